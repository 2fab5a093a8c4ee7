//! Rate limiting

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    /// Requests per second limit
    limit: u32,
    /// IP -> (request count, window start)
    state: HashMap<IpAddr, (u32, Instant)>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: HashMap::new(),
        }
    }

    /// Check if request should be allowed
    pub fn check(&mut self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let entry = self.state.entry(ip).or_insert((0, now));

        // Reset window if expired
        if now.duration_since(entry.1).as_secs() >= 1 {
            *entry = (1, now);
            return true;
        }

        // Check limit
        if entry.0 < self.limit {
            entry.0 += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects_burst() {
        let mut limiter = RateLimiter::new(3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip), "fourth request within the same window should be rejected");
    }

    #[test]
    fn tracks_ips_independently() {
        let mut limiter = RateLimiter::new(1);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b), "a distinct IP should have its own independent budget");
    }
}
