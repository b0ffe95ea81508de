use crate::core::errors::ExchangeError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// A shared pool consumed by an endpoint in addition to its own budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedLimit {
    pub limit_id: String,
    pub weight: u32,
}

/// Static budget for one endpoint or pool: `capacity` weight units per `interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit_id: String,
    pub capacity: u32,
    pub interval: Duration,
    /// Units consumed from this rule's own bucket per call
    pub weight: u32,
    pub linked: Vec<LinkedLimit>,
}

impl RateLimitRule {
    pub fn new(limit_id: impl Into<String>, capacity: u32, interval: Duration) -> Self {
        Self {
            limit_id: limit_id.into(),
            capacity,
            interval,
            weight: 1,
            linked: Vec::new(),
        }
    }

    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn linked(mut self, pool_id: impl Into<String>, weight: u32) -> Self {
        self.linked.push(LinkedLimit {
            limit_id: pool_id.into(),
            weight,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// Slot reserved; the caller must not issue the request before this instant
    Wait(Instant),
    Rejected(String),
}

/// Runtime log of admitted (or reserved) weight for one rule.
#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    interval: Duration,
    log: Vec<(Instant, u32)>,
}

impl TokenBucket {
    fn prune(&mut self, now: Instant) {
        let interval = self.interval;
        self.log.retain(|(at, _)| *at + interval > now);
    }

    // Weight within one interval on either side of `at`, which covers every
    // window of length `interval` that could contain `at`.
    fn load_around(&self, at: Instant) -> u32 {
        self.log
            .iter()
            .filter(|(t, _)| {
                let distance = if *t > at { *t - at } else { at - *t };
                distance < self.interval
            })
            .map(|(_, w)| *w)
            .sum()
    }

    fn admits(&self, at: Instant, weight: u32) -> bool {
        self.load_around(at) + weight <= self.capacity
    }
}

/// Sliding-window limiter over per-endpoint rules and linked pools.
///
/// A call is admitted only when every bucket it touches has room. Callers that
/// cannot proceed immediately reserve the earliest instant at which all of
/// their buckets admit them, in arrival order, and sleep until then.
#[derive(Debug)]
pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        let buckets = rules
            .iter()
            .map(|rule| {
                (
                    rule.limit_id.clone(),
                    TokenBucket {
                        capacity: rule.capacity,
                        interval: rule.interval,
                        log: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            rules: rules
                .into_iter()
                .map(|rule| (rule.limit_id.clone(), rule))
                .collect(),
            buckets: Mutex::new(buckets),
        }
    }

    pub fn has_rule(&self, limit_id: &str) -> bool {
        self.rules.contains_key(limit_id)
    }

    fn requirements(&self, limit_id: &str) -> Result<Vec<(&str, u32)>, String> {
        let rule = self
            .rules
            .get(limit_id)
            .ok_or_else(|| format!("no rate limit rule for '{limit_id}'"))?;

        let mut required = vec![(rule.limit_id.as_str(), rule.weight)];
        for link in &rule.linked {
            if !self.rules.contains_key(&link.limit_id) {
                return Err(format!(
                    "'{}' is linked to unknown pool '{}'",
                    limit_id, link.limit_id
                ));
            }
            required.push((link.limit_id.as_str(), link.weight));
        }

        for (id, weight) in &required {
            let capacity = self.rules[*id].capacity;
            if *weight > capacity {
                return Err(format!(
                    "weight {weight} exceeds capacity {capacity} of '{id}'"
                ));
            }
        }
        Ok(required)
    }

    /// Decide and record admission for a call issued at `now`.
    pub fn reserve(&self, limit_id: &str, now: Instant) -> Admission {
        let required = match self.requirements(limit_id) {
            Ok(required) => required,
            Err(reason) => return Admission::Rejected(reason),
        };

        let mut buckets = self.buckets.lock();
        let mut candidates = vec![now];
        for (id, _) in &required {
            if let Some(bucket) = buckets.get_mut(*id) {
                bucket.prune(now);
                candidates.extend(
                    bucket
                        .log
                        .iter()
                        .map(|(at, _)| *at + bucket.interval)
                        .filter(|at| *at > now),
                );
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        for at in candidates {
            let admitted = required
                .iter()
                .all(|(id, weight)| buckets.get(*id).is_some_and(|b| b.admits(at, *weight)));
            if !admitted {
                continue;
            }

            for (id, weight) in &required {
                if let Some(bucket) = buckets.get_mut(*id) {
                    bucket.log.push((at, *weight));
                }
            }
            return if at == now {
                Admission::Proceed
            } else {
                Admission::Wait(at)
            };
        }

        // The last candidate lies a full interval past every logged entry
        Admission::Rejected(format!("no admissible slot for '{limit_id}'"))
    }

    /// Wait until `limit_id` may be called. Never drops the call; only an
    /// unknown rule or an impossible weight is rejected.
    pub async fn acquire(&self, limit_id: &str) -> Result<(), ExchangeError> {
        let now = Instant::now();
        match self.reserve(limit_id, now) {
            Admission::Proceed => {
                trace!(limit_id, "rate limit admitted");
                Ok(())
            }
            Admission::Wait(until) => {
                debug!(
                    limit_id,
                    wait_ms = (until - now).as_millis() as u64,
                    "rate limit reached, delaying request"
                );
                sleep_until(until).await;
                Ok(())
            }
            Admission::Rejected(reason) => Err(ExchangeError::RateLimitExceeded(reason)),
        }
    }
}
