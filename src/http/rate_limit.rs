//! Per-caller sliding-window limiter for mutating calls.
//!
//! Independent of the ledger's own locking: it only ever sees identities.
//! Memory is bounded: callers whose window emptied are swept, and at most
//! `max_tracked` callers are remembered at once.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{config::RateLimitConfig, domain::identity::Identity};

#[derive(Default)]
struct Windows {
    by_caller: HashMap<Identity, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

pub struct RateLimiter {
    max_calls: usize,
    max_tracked: usize,
    window: Duration,
    windows: Mutex<Windows>,
}

fn expire(recent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = recent.front() {
        if now.duration_since(oldest) >= window {
            recent.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_calls: config.max_calls,
            max_tracked: config.max_tracked.max(1),
            window: Duration::from_secs(config.window_secs),
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Records a call at `now` if the caller still has room in the window.
    pub fn allow(&self, who: &Identity, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let sweep_due = windows
            .last_sweep
            .is_none_or(|last| now.duration_since(last) >= self.window);
        if sweep_due {
            self.sweep(&mut windows, now);
        }
        if !windows.by_caller.contains_key(who) && windows.by_caller.len() >= self.max_tracked {
            self.sweep(&mut windows, now);
            if windows.by_caller.len() >= self.max_tracked {
                Self::evict_stalest(&mut windows);
            }
        }

        let recent = windows.by_caller.entry(who.clone()).or_default();
        expire(recent, now, self.window);
        let allowed = recent.len() < self.max_calls;
        if allowed {
            recent.push_back(now);
        } else if recent.is_empty() {
            windows.by_caller.remove(who);
        }
        allowed
    }

    fn sweep(&self, windows: &mut Windows, now: Instant) {
        windows.by_caller.retain(|_, recent| {
            expire(recent, now, self.window);
            !recent.is_empty()
        });
        windows.last_sweep = Some(now);
    }

    /// Forgets the caller whose latest call is the oldest.
    fn evict_stalest(windows: &mut Windows) {
        let stalest = windows
            .by_caller
            .iter()
            .min_by_key(|(_, recent)| recent.back().copied())
            .map(|(who, _)| who.clone());
        if let Some(who) = stalest {
            log::debug!("rate limiter full, forgetting {who}");
            windows.by_caller.remove(&who);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_caller
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_calls: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_calls,
            window_secs,
            max_tracked: 1024,
        })
    }

    #[test]
    fn refuses_calls_beyond_capacity_within_window() {
        let limiter = limiter(2, 10);
        let t0 = Instant::now();
        let alice = Identity::from("alice");

        assert!(limiter.allow(&alice, t0));
        assert!(limiter.allow(&alice, t0 + Duration::from_secs(1)));
        assert!(!limiter.allow(&alice, t0 + Duration::from_secs(2)));
        // other callers have their own window
        assert!(limiter.allow(&"bob".into(), t0 + Duration::from_secs(2)));
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(1, 10);
        let t0 = Instant::now();
        let alice = Identity::from("alice");

        assert!(limiter.allow(&alice, t0));
        assert!(!limiter.allow(&alice, t0 + Duration::from_secs(9)));
        assert!(limiter.allow(&alice, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn expired_callers_are_forgotten() {
        let limiter = limiter(5, 10);
        let t0 = Instant::now();

        for i in 0..100 {
            assert!(limiter.allow(&format!("caller{i}").into(), t0));
        }
        assert_eq!(limiter.tracked(), 100);

        assert!(limiter.allow(&"late".into(), t0 + Duration::from_secs(10)));
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn tracked_callers_are_capped() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            max_calls: 1,
            window_secs: 3600,
            max_tracked: 2,
        });
        let t0 = Instant::now();
        let alice = Identity::from("alice");

        assert!(limiter.allow(&alice, t0));
        assert!(limiter.allow(&"bob".into(), t0 + Duration::from_secs(1)));
        assert!(limiter.allow(&"carol".into(), t0 + Duration::from_secs(2)));
        assert_eq!(limiter.tracked(), 2);

        // alice was the stalest and got evicted, so her window restarted
        assert!(limiter.allow(&alice, t0 + Duration::from_secs(3)));
        assert!(!limiter.allow(&"carol".into(), t0 + Duration::from_secs(4)));
    }
}
