//! Per-user run serialization.
//!
//! Two runs for the same user would race on that user's artifacts and on
//! the portal session cached in its cookie file. The guard admits one run
//! per user at a time; runs for different users never contend.

use crate::core::UserIdentifier;
use crate::errors::CalflowError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

/// What to do when a run arrives for a user that already has one in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Queue behind the in-flight run.
    #[default]
    Wait,
    /// Fail immediately with `RunInProgress`.
    Reject,
}

/// Result of acquiring the guard.
#[derive(Debug)]
pub struct Admission {
    /// Held for the lifetime of the run.
    pub permit: RunPermit,
    /// True if another run for the same user was in flight on arrival.
    pub overlapped: bool,
}

/// Admits at most one run per user.
#[derive(Debug, Clone, Default)]
pub struct UserRunGuard {
    slots: Arc<DashMap<UserIdentifier, Slot>>,
}

impl UserRunGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the run slot for `user` under `policy`.
    pub async fn acquire(
        &self,
        user: &UserIdentifier,
        policy: OverlapPolicy,
    ) -> Result<Admission, CalflowError> {
        let slot = Arc::clone(&*self.slots.entry(user.clone()).or_default());

        if let Ok(held) = Arc::clone(&slot).try_lock_owned() {
            return Ok(self.admit(user, held, false));
        }

        match policy {
            OverlapPolicy::Reject => Err(CalflowError::RunInProgress {
                user: user.to_string(),
            }),
            OverlapPolicy::Wait => {
                let held = slot.lock_owned().await;
                Ok(self.admit(user, held, true))
            }
        }
    }

    /// Returns true if a run for `user` currently holds its slot.
    #[must_use]
    pub fn is_running(&self, user: &UserIdentifier) -> bool {
        self.slots
            .get(user)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of users with a run in flight or queued.
    #[must_use]
    pub fn active_users(&self) -> usize {
        self.slots.len()
    }

    fn admit(
        &self,
        user: &UserIdentifier,
        held: OwnedMutexGuard<()>,
        overlapped: bool,
    ) -> Admission {
        Admission {
            permit: RunPermit {
                user: user.clone(),
                held: Some(held),
                slots: Arc::clone(&self.slots),
            },
            overlapped,
        }
    }
}

/// Proof that the holder owns its user's run slot. Released on drop.
#[derive(Debug)]
pub struct RunPermit {
    user: UserIdentifier,
    held: Option<OwnedMutexGuard<()>>,
    slots: Arc<DashMap<UserIdentifier, Slot>>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.held.take();
        // Nobody else references the slot: no run is queued behind us.
        self.slots
            .remove_if(&self.user, |_, slot| Arc::strong_count(slot) == 1);
    }
}
