//! Profile Pool (C2): lends and returns profile ids under fairness and
//! cooldown rules.
//!
//! The pool is sized at construction from configuration and is immutable
//! thereafter (`spec.md` §4.2, invariant iii) — no profile is ever added or
//! removed once [`ProfilePool::new`] returns. Lease bookkeeping is pure
//! in-memory arithmetic and never held across an `.await`, so a blocking
//! `std::sync::Mutex` is the right tool, not an async one.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use harvestflow_ids::{JobId, ProfileId};
use thiserror::Error;

/// A large additive bias applied to a profile's score once it has been idle
/// past the switch interval, so it decisively wins selection regardless of
/// `requestCount` (`spec.md` §4.2).
const SWITCH_INTERVAL_BIAS: f64 = 1_000_000.0;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("profile pool has no eligible profile to lease")]
    Exhausted,
    #[error("profile {0} is not held by the releaser")]
    NotHeld(String),
    #[error("unknown profile id: {0}")]
    UnknownProfile(String),
}

/// Result of a [`ProfilePool::lease`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// A profile was leased and is ready for immediate use.
    Ready(ProfileId),
    /// No profile is held, but the best candidate is still within its
    /// cooldown window. The scheduler should queue the job and poll.
    CoolingDown,
}

struct ProfileSlot {
    id: ProfileId,
    last_release_time: Option<Instant>,
    rolling_request_count: u64,
    currently_held_by: Option<JobId>,
}

/// Fixed pool of browser profile ids, leased out under the fairness rule
/// from `spec.md` §4.2: `(now - lastReleaseTime) - 10 * requestCount`,
/// overridden by a decisive bias once a profile has idled past the switch
/// interval.
pub struct ProfilePool {
    slots: Mutex<Vec<ProfileSlot>>,
    cooldown: Duration,
    switch_interval: Duration,
}

impl ProfilePool {
    /// Builds the pool from a fixed list of profile ids. The set of ids is
    /// immutable for the lifetime of the pool.
    pub fn new(profile_ids: Vec<String>, cooldown: Duration, switch_interval: Duration) -> Self {
        let slots = profile_ids
            .into_iter()
            .map(|id| ProfileSlot {
                id: ProfileId::new(id),
                last_release_time: None,
                rolling_request_count: 0,
                currently_held_by: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            cooldown,
            switch_interval,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.lock().expect("profile pool mutex poisoned").len()
    }

    /// Leases the highest-scoring eligible profile to `job_id`. Returns
    /// [`LeaseOutcome::CoolingDown`] rather than blocking when the best
    /// candidate is still within its cooldown window, letting the caller
    /// (the scheduler) decide to queue and poll (`spec.md` §4.2).
    pub fn lease(&self, job_id: JobId) -> Result<LeaseOutcome, PoolError> {
        let mut slots = self.slots.lock().expect("profile pool mutex poisoned");
        let now = Instant::now();

        let mut best: Option<(usize, f64)> = None;
        let mut any_cooling_down = false;

        for (idx, slot) in slots.iter().enumerate() {
            if slot.currently_held_by.is_some() {
                continue;
            }

            let idle = match slot.last_release_time {
                None => None, // never used: treat as maximally idle
                Some(last) => Some(now.duration_since(last)),
            };

            if let Some(idle) = idle {
                if idle < self.cooldown {
                    any_cooling_down = true;
                    continue;
                }
            }

            let idle_secs = idle.map(|d| d.as_secs_f64()).unwrap_or(f64::MAX / 2.0);
            let mut score = idle_secs - 10.0 * slot.rolling_request_count as f64;
            let idle_past_switch = idle.map(|d| d >= self.switch_interval).unwrap_or(true);
            if idle_past_switch {
                score += SWITCH_INTERVAL_BIAS;
            }

            if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, _)) => {
                let slot = &mut slots[idx];
                slot.currently_held_by = Some(job_id);
                slot.rolling_request_count += 1;
                Ok(LeaseOutcome::Ready(slot.id.clone()))
            }
            None if any_cooling_down => Ok(LeaseOutcome::CoolingDown),
            None => Err(PoolError::Exhausted),
        }
    }

    /// Releases `profile_id`, validating it is currently held by `job_id`
    /// (invariant ii). Releasing an unheld or wrongly-held profile is an
    /// error, not a no-op silently ignored.
    pub fn release(&self, profile_id: &ProfileId, job_id: JobId) -> Result<(), PoolError> {
        let mut slots = self.slots.lock().expect("profile pool mutex poisoned");
        let slot = slots
            .iter_mut()
            .find(|s| &s.id == profile_id)
            .ok_or_else(|| PoolError::UnknownProfile(profile_id.as_str().to_string()))?;

        match slot.currently_held_by {
            Some(held_by) if held_by == job_id => {
                slot.currently_held_by = None;
                slot.last_release_time = Some(Instant::now());
                Ok(())
            }
            _ => Err(PoolError::NotHeld(profile_id.as_str().to_string())),
        }
    }

    /// Restart recovery (`spec.md` §4.7, item 3): clears every in-memory
    /// hold. The pool keeps no durable state of its own, so this is the
    /// entire recovery — callers are responsible for restarting every job
    /// that held a profile back to `Pending` first.
    pub fn recover(&self) {
        let mut slots = self.slots.lock().expect("profile pool mutex poisoned");
        for slot in slots.iter_mut() {
            if slot.currently_held_by.take().is_some() {
                tracing::warn!(profile_id = %slot.id, "releasing orphaned lease on restart");
                slot.last_release_time = Some(Instant::now());
            }
        }
    }
}
