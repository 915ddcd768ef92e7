use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const SWEEP_EVERY: u32 = 256;

/// Bucket shared by every request whose peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate-limit bucket key derived from the caller's network origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn from_addr(addr: Option<IpAddr>) -> Self {
        match addr {
            Some(ip) => Self(ip.to_string()),
            None => Self::unknown(),
        }
    }

    pub fn unknown() -> Self {
        Self(String::from(UNKNOWN_CLIENT))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

impl Admission {
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, VecDeque<Instant>>,
    admissions_since_sweep: u32,
}

/// Per-client sliding-window limiter: at most `max_requests` admissions in
/// any trailing `window`.
///
/// Prune, count and append for one decision happen under a single lock, so
/// concurrent callers for the same identity can never over-admit. Only
/// admitted attempts are recorded.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, identity: &ClientIdentity) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &ClientIdentity, now: Instant) -> Admission {
        if self.max_requests == 0 {
            return Admission::Rejected {
                retry_after_secs: self.window.as_secs(),
            };
        }

        let mut state = self.lock();

        state.admissions_since_sweep += 1;
        if state.admissions_since_sweep >= SWEEP_EVERY {
            state.admissions_since_sweep = 0;
            evict_expired(&mut state.windows, self.window, now);
        }

        let timestamps = state.windows.entry(identity.as_str().to_owned()).or_default();
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            let elapsed = timestamps
                .front()
                .map_or(Duration::ZERO, |oldest| now.saturating_duration_since(*oldest));
            return Admission::Rejected {
                retry_after_secs: self.window.saturating_sub(elapsed).as_secs(),
            };
        }

        timestamps.push_back(now);
        Admission::Allowed
    }

    /// Drop identities with no admission inside the window ending at `now`.
    pub fn evict_idle(&self, now: Instant) {
        let mut state = self.lock();
        evict_expired(&mut state.windows, self.window, now);
    }

    pub fn tracked_identities(&self) -> usize {
        self.lock().windows.len()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn evict_expired(windows: &mut HashMap<String, VecDeque<Instant>>, window: Duration, now: Instant) {
    let before = windows.len();
    windows.retain(|_, timestamps| {
        timestamps
            .back()
            .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
    });
    let evicted = before - windows.len();
    if evicted > 0 {
        tracing::debug!(evicted, remaining = windows.len(), "evicted idle rate-limit windows");
    }
}
