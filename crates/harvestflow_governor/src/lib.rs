//! Rate Governor (C1): enforces per-API-key and per-document call-rate
//! ceilings with exponential backoff.
//!
//! One [`RateGovernor`] is constructed at startup and shared (`Arc`) by the
//! scheduler and every job's uploader calls — the only cross-job
//! synchronization point besides the Profile Pool and Record Store.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Maximum calls admitted per rolling window.
const CEILING: usize = 3;
/// Width of the rolling rate window.
const WINDOW: Duration = Duration::from_secs(1);

const BACKOFF_BASE_SECS: f64 = 1.0;
const BACKOFF_CAP_SECS: f64 = 60.0;

/// A sliding 1-second window of outgoing-call timestamps for one governed
/// surface (app-wide, or a single document).
#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `None` if a call may be dispatched now, or `Some(delay)` —
    /// how long the caller must sleep before rechecking — if the ceiling is
    /// currently met.
    fn wait_hint(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.calls.len() < CEILING {
            None
        } else {
            let oldest = *self.calls.front().expect("ceiling > 0 implies non-empty");
            Some(WINDOW.saturating_sub(now.duration_since(oldest)))
        }
    }

    fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
    }
}

/// Shared rate governor for the application-wide window plus one window per
/// external document id.
pub struct RateGovernor {
    app_window: Mutex<RateWindow>,
    doc_windows: Mutex<HashMap<String, RateWindow>>,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            app_window: Mutex::new(RateWindow::default()),
            doc_windows: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks (by yielding the caller's task, never busy-waiting) until
    /// fewer than [`CEILING`] app-wide calls have been recorded within the
    /// trailing window.
    pub async fn acquire_app(&self) {
        loop {
            let hint = {
                let mut window = self.app_window.lock().await;
                window.wait_hint(Instant::now())
            };
            match hint {
                None => return,
                Some(delay) => {
                    tracing::debug!(?delay, "app rate window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Same as [`Self::acquire_app`], scoped to a single document id.
    pub async fn acquire_doc(&self, doc_id: &str) {
        loop {
            let hint = {
                let mut windows = self.doc_windows.lock().await;
                let window = windows.entry(doc_id.to_string()).or_default();
                window.wait_hint(Instant::now())
            };
            match hint {
                None => return,
                Some(delay) => {
                    tracing::debug!(doc_id, ?delay, "doc rate window full, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Must be called immediately after the governed call is dispatched
    /// (not after it completes) so the window bounds outgoing-call rate.
    pub async fn record_app(&self) {
        let mut window = self.app_window.lock().await;
        window.record(Instant::now());
    }

    /// Same as [`Self::record_app`], scoped to a single document id.
    pub async fn record_doc(&self, doc_id: &str) {
        let mut windows = self.doc_windows.lock().await;
        windows.entry(doc_id.to_string()).or_default().record(Instant::now());
    }
}

/// `delay = min(base * 2^attempt + jitter, cap)`, `jitter ∈ [0, 0.1 * base *
/// 2^attempt)`. A pure function of `attempt` modulo jitter, so callers
/// choosing whether to back off decide separately (`spec.md` §4.1).
pub fn backoff_delay(attempt: u32) -> Duration {
    let scale = BACKOFF_BASE_SECS * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..(0.1 * scale).max(f64::EPSILON));
    let secs = (scale + jitter).min(BACKOFF_CAP_SECS);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn backoff_delay_respects_lower_and_upper_bounds() {
        for attempt in 0..8 {
            let scale = BACKOFF_BASE_SECS * 2f64.powi(attempt);
            let delay = backoff_delay(attempt as u32).as_secs_f64();
            assert!(delay >= scale - f64::EPSILON, "attempt {attempt}: {delay} < {scale}");
            let upper = (scale * 1.1).min(BACKOFF_CAP_SECS);
            assert!(delay <= upper + 1e-6, "attempt {attempt}: {delay} > {upper}");
        }
    }

    #[test]
    fn backoff_delay_is_capped() {
        let delay = backoff_delay(20).as_secs_f64();
        assert!(delay <= BACKOFF_CAP_SECS + 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_app_admits_ceiling_then_blocks() {
        let governor = Arc::new(RateGovernor::new());
        for _ in 0..CEILING {
            governor.acquire_app().await;
            governor.record_app().await;
        }

        let start = tokio::time::Instant::now();
        governor.acquire_app().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_doc_windows_are_independent_per_document() {
        let governor = Arc::new(RateGovernor::new());
        for _ in 0..CEILING {
            governor.acquire_doc("doc-a").await;
            governor.record_doc("doc-a").await;
        }

        // doc-b has its own window and is not throttled by doc-a's calls.
        let start = tokio::time::Instant::now();
        governor.acquire_doc("doc-b").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_s4_ten_token_fetches_respect_ceiling() {
        // spec.md §8 (S4): ceiling_app = 3/s, 10 back-to-back dispatches.
        let governor = Arc::new(RateGovernor::new());
        let start = tokio::time::Instant::now();
        let mut dispatch_times = Vec::new();
        for _ in 0..10 {
            governor.acquire_app().await;
            governor.record_app().await;
            dispatch_times.push(start.elapsed());
        }

        assert!(dispatch_times[3] >= Duration::from_millis(900));
        assert!(dispatch_times[6] - dispatch_times[3] >= Duration::from_millis(900));
        assert!(dispatch_times[9] >= Duration::from_secs(2) + Duration::from_millis(900));
    }
}
