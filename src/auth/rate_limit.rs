use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failed-login reports accepted per client IP inside one window.
pub const DEFAULT_FAILED_LOGIN_IP_LIMIT: u32 = 10;
pub const DEFAULT_FAILED_LOGIN_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>) -> RateLimitDecision;
}

/// Rolling-window counter keyed by client IP, held in process memory.
///
/// Requests without a resolvable IP are not counted.
pub struct IpRateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl IpRateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn check_at(&self, ip: &str, now: Instant) -> RateLimitDecision {
        let Ok(mut hits) = self.hits.lock() else {
            return RateLimitDecision::Allowed;
        };
        // Drop idle keys so the map does not grow with every address seen.
        hits.retain(|_, seen| {
            while seen
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
            {
                seen.pop_front();
            }
            !seen.is_empty()
        });
        let seen = hits.entry(ip.to_string()).or_default();
        if seen.len() >= self.limit {
            return RateLimitDecision::Limited;
        }
        seen.push_back(now);
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for IpRateLimiter {
    fn check_ip(&self, ip: Option<&str>) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check_at(ip, Instant::now()),
            None => RateLimitDecision::Allowed,
        }
    }
}
