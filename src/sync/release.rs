//! Release-fence ordering against the GPU command-buffer sequence.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::errors::{PrismError, Result};

use super::Fence;

/// Hands out monotonically increasing sequence numbers for submitted GPU
/// command buffers.
///
/// The renderer calls [`generate_next`](Self::generate_next) once per
/// submission; the release-fence signaller reads
/// [`latest_sequence_number`](Self::latest_sequence_number) to stamp
/// incoming fences. Handles are cheap to clone and share one counter.
#[derive(Clone, Default)]
pub struct CommandBufferSequencer {
    latest: Rc<Cell<u64>>,
}

impl CommandBufferSequencer {
    /// Creates a sequencer starting at sequence number 0 (nothing
    /// submitted yet).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves and returns the next sequence number.
    pub fn generate_next(&self) -> u64 {
        let next = self.latest.get() + 1;
        self.latest.set(next);
        next
    }

    /// The sequence number of the most recently submitted command buffer,
    /// or 0 if nothing has been submitted.
    #[must_use]
    pub fn latest_sequence_number(&self) -> u64 {
        self.latest.get()
    }
}

struct PendingFence {
    sequence_number: u64,
    fence: Fence,
}

/// Signals CPU release fences once the GPU has consumed everything
/// submitted before them.
///
/// Each incoming fence is stamped with the latest command-buffer sequence
/// number; it is signalled exactly when all command buffers up to and
/// including that number have finished. The pending FIFO is therefore
/// non-decreasing in sequence number, and no fence is ever signalled
/// before an earlier-enqueued one.
pub struct ReleaseFenceSignaller {
    sequencer: CommandBufferSequencer,
    last_finished_sequence_number: u64,
    pending: VecDeque<PendingFence>,
}

impl ReleaseFenceSignaller {
    /// Creates a signaller bound to `sequencer`.
    #[must_use]
    pub fn new(sequencer: CommandBufferSequencer) -> Self {
        Self {
            sequencer,
            last_finished_sequence_number: 0,
            pending: VecDeque::new(),
        }
    }

    /// Enqueues a CPU release fence against the current latest sequence
    /// number, or signals it immediately if that work already finished.
    ///
    /// # Errors
    ///
    /// [`PrismError::FenceSequenceOutOfOrder`] if the sequencer's latest
    /// number is *behind* the last finished number — that means the
    /// renderer's submission path is broken, and continuing would violate
    /// the FIFO ordering invariant.
    pub fn add_cpu_release_fence(&mut self, fence: Fence) -> Result<()> {
        let latest = self.sequencer.latest_sequence_number();
        if latest > self.last_finished_sequence_number {
            self.pending.push_back(PendingFence {
                sequence_number: latest,
                fence,
            });
            Ok(())
        } else if latest == self.last_finished_sequence_number {
            fence.signal();
            Ok(())
        } else {
            Err(PrismError::FenceSequenceOutOfOrder {
                latest,
                last_finished: self.last_finished_sequence_number,
            })
        }
    }

    /// Reports that every command buffer up to and including
    /// `sequence_number` has completed, signalling all fences that were
    /// waiting on it.
    pub fn on_command_buffer_finished(&mut self, sequence_number: u64) {
        self.last_finished_sequence_number = sequence_number;
        while let Some(front) = self.pending.front() {
            if front.sequence_number > sequence_number {
                break;
            }
            let front = self
                .pending
                .pop_front()
                .expect("pending fence must exist after the front was inspected");
            front.fence.signal();
        }
    }

    /// Number of fences still waiting on unfinished command buffers.
    #[must_use]
    pub fn pending_fence_count(&self) -> usize {
        self.pending.len()
    }

    /// The sequencer this signaller is bound to.
    #[must_use]
    pub fn sequencer(&self) -> &CommandBufferSequencer {
        &self.sequencer
    }
}
