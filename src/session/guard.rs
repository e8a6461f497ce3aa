use std::time::Duration;

use tokio::time::Instant;

use crate::types::IdentityId;

/// Why a reconciliation trigger was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// Another reconciliation holds the slot.
    InFlight,
    /// The same identity finished reconciling less than the cooldown ago.
    Cooldown { remaining: Duration },
}

/// Single-flight and anti-loop bookkeeping for reconciliation.
///
/// `epoch` advances on every sign-out. A reconciliation captures the epoch it
/// was admitted under and may only write state while that epoch is current,
/// so work started before a sign-out can never resurrect the old user.
///
/// `profile_revision` advances on every profile write. A fetch that started
/// at an older revision must not replace a profile written since.
#[derive(Debug, Default)]
pub(crate) struct ReconcileGuard {
    in_flight: Option<u64>,
    last: Option<(IdentityId, Instant)>,
    epoch: u64,
    profile_revision: u64,
}

impl ReconcileGuard {
    /// Claim the reconciliation slot for `id`. Returns the epoch to commit under.
    pub(crate) fn admit(
        &mut self,
        id: &IdentityId,
        now: Instant,
        cooldown: Duration,
    ) -> Result<u64, Rejection> {
        if self.in_flight.is_some() {
            return Err(Rejection::InFlight);
        }
        if let Some((last_id, finished_at)) = &self.last {
            let elapsed = now.saturating_duration_since(*finished_at);
            if last_id == id && elapsed < cooldown {
                return Err(Rejection::Cooldown {
                    remaining: cooldown - elapsed,
                });
            }
        }
        self.in_flight = Some(self.epoch);
        Ok(self.epoch)
    }

    /// Release the slot and remember `id` for the cooldown check.
    /// No-op when the slot was already taken away by a sign-out.
    pub(crate) fn finish(&mut self, epoch: u64, id: &IdentityId, now: Instant) {
        if self.in_flight == Some(epoch) {
            self.in_flight = None;
            self.last = Some((id.clone(), now));
        }
    }

    /// Release the slot without recording completion.
    pub(crate) fn release(&mut self, epoch: u64) {
        if self.in_flight == Some(epoch) {
            self.in_flight = None;
        }
    }

    /// Sign-out: orphan any in-flight work and forget the last identity.
    pub(crate) fn invalidate(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.in_flight = None;
        self.last = None;
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn profile_revision(&self) -> u64 {
        self.profile_revision
    }

    /// Record a profile write.
    pub(crate) fn bump_profile_revision(&mut self) {
        self.profile_revision = self.profile_revision.wrapping_add(1);
    }

    /// Whether no profile was written since `revision` was read.
    pub(crate) fn profile_unchanged_since(&self, revision: u64) -> bool {
        self.profile_revision == revision
    }
}
