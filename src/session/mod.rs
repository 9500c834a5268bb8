//! Client Sessions
//!
//! Each client owns one [`Session`]: an isolated resource namespace plus
//! two ordered update queues. Commands are buffered with
//! [`Session::enqueue`] and submitted with a `Present`
//! ([`Session::schedule_update`]) carrying a requested presentation time,
//! acquire fences (waited on before the commands apply), release fences
//! (signalled once the GPU has consumed the previous frame's resources),
//! and a presentation callback.
//!
//! The [`applier`] module validates and applies commands against the
//! scene graph; [`image_pipe`] implements the streaming-image side
//! channel with per-frame upload coalescing.

pub mod applier;
pub mod command;
pub mod event;
pub mod image_pipe;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod session;

pub use applier::CommandContext;
pub use command::{Command, QuatValue, RendererParam, ResourceSpec, Vec3Value};
pub use event::SessionEvent;
pub use image_pipe::{ImagePipe, ImagePipeUpdateResults};
pub use manager::SessionManager;
pub use session::{
    ApplyUpdateResult, PresentCallback, PresentationInfo, Session, Update, UpdateScheduler,
};
