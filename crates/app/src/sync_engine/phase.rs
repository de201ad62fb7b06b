//! Per-pass phase machine.
//!
//! Classifying, Batching, Embedding, Upserting and Verifying repeat once per
//! batch. Done is only reachable once nothing is pending.

use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};

/// Phase of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Listing candidate files.
    Scanning,
    /// Fingerprinting and classifying one file.
    Classifying,
    /// A changed file joined the pending batch.
    Batching,
    /// Embedding the pending batch.
    Embedding,
    /// Writing the embedded batch.
    Upserting,
    /// Spot-checking one written point.
    Verifying,
    /// Pass finished.
    Done,
}

impl SyncPhase {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Classifying => "classifying",
            Self::Batching => "batching",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
            Self::Verifying => "verifying",
            Self::Done => "done",
        }
    }
}

/// Allowed `(from, to)` phase transitions.
pub const SYNC_PHASE_TRANSITIONS: &[(SyncPhase, SyncPhase)] = &[
    (SyncPhase::Scanning, SyncPhase::Classifying),
    (SyncPhase::Scanning, SyncPhase::Done),
    (SyncPhase::Classifying, SyncPhase::Batching),
    // Only the end-of-input flush takes this; in-loop flushes go through Batching.
    (SyncPhase::Classifying, SyncPhase::Embedding),
    (SyncPhase::Classifying, SyncPhase::Done),
    (SyncPhase::Batching, SyncPhase::Classifying),
    (SyncPhase::Batching, SyncPhase::Embedding),
    (SyncPhase::Embedding, SyncPhase::Upserting),
    (SyncPhase::Upserting, SyncPhase::Verifying),
    (SyncPhase::Upserting, SyncPhase::Classifying),
    (SyncPhase::Upserting, SyncPhase::Done),
    (SyncPhase::Verifying, SyncPhase::Classifying),
    (SyncPhase::Verifying, SyncPhase::Done),
];

#[derive(Debug)]
pub(crate) struct SyncPhaseFsm {
    state: SyncPhase,
}

impl SyncPhaseFsm {
    pub(crate) const fn new() -> Self {
        Self {
            state: SyncPhase::Scanning,
        }
    }

    #[cfg(test)]
    pub(crate) const fn state(&self) -> SyncPhase {
        self.state
    }

    /// Move to `next`. Re-entering the current phase is a no-op.
    pub(crate) fn transition(&mut self, next: SyncPhase) -> Result<()> {
        if self.state == next || is_allowed_transition(self.state, next) {
            self.state = next;
            return Ok(());
        }
        Err(ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!(
                "invalid sync phase transition: {} -> {}",
                self.state.as_str(),
                next.as_str()
            ),
            ErrorClass::NonRetriable,
        ))
    }
}

fn is_allowed_transition(from: SyncPhase, to: SyncPhase) -> bool {
    SYNC_PHASE_TRANSITIONS
        .iter()
        .any(|(source, target)| *source == from && *target == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_batch_cycle_is_allowed() -> Result<()> {
        let mut fsm = SyncPhaseFsm::new();
        for next in [
            SyncPhase::Classifying,
            SyncPhase::Batching,
            SyncPhase::Embedding,
            SyncPhase::Upserting,
            SyncPhase::Verifying,
            SyncPhase::Classifying,
            SyncPhase::Done,
        ] {
            fsm.transition(next)?;
        }
        assert_eq!(fsm.state(), SyncPhase::Done);
        Ok(())
    }

    #[test]
    fn pending_batch_cannot_skip_to_done() {
        let mut fsm = SyncPhaseFsm::new();
        let result = fsm
            .transition(SyncPhase::Classifying)
            .and_then(|()| fsm.transition(SyncPhase::Batching))
            .and_then(|()| fsm.transition(SyncPhase::Done));

        assert_eq!(result.err().map(|e| e.code), Some(ErrorCode::internal()));
        assert_eq!(fsm.state(), SyncPhase::Batching);
    }

    #[test]
    fn upsert_requires_embedding_first() {
        let mut fsm = SyncPhaseFsm::new();
        let result = fsm
            .transition(SyncPhase::Classifying)
            .and_then(|()| fsm.transition(SyncPhase::Upserting));
        assert!(result.is_err());
    }
}
