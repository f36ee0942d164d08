//! Fault injection for the mock log
//!
//! Simulates an unreliable provider:
//! - Failing head and range queries
//! - Failing subscriptions and dropped push connections
//! - Duplicated and reordered deliveries
//! - Slow or refused submissions

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Provider fault configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Probability a head or range query fails
    pub fetch_failure_rate: f64,
    /// Probability a subscribe call fails
    pub subscribe_failure_rate: f64,
    /// Probability the push connection drops after a delivery
    pub feed_drop_rate: f64,
    /// Probability a delivery is pushed twice
    pub duplicate_rate: f64,
    /// Probability a delivery is held back behind the next one
    pub reorder_rate: f64,
    /// Probability a submission is refused
    pub submit_reject_rate: f64,
    /// Submission latency range
    pub submit_latency: (Duration, Duration),
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

impl ChaosConfig {
    /// No faults, short fixed latency
    pub fn reliable() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.0,
            subscribe_failure_rate: 0.0,
            feed_drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            submit_reject_rate: 0.0,
            submit_latency: (Duration::from_millis(50), Duration::from_millis(50)),
        }
    }

    /// Occasional hiccups
    pub fn flaky() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.1,
            subscribe_failure_rate: 0.05,
            feed_drop_rate: 0.01,
            duplicate_rate: 0.05,
            reorder_rate: 0.05,
            submit_reject_rate: 0.05,
            submit_latency: (Duration::from_millis(20), Duration::from_millis(200)),
        }
    }

    /// Everything goes wrong, often
    pub fn hostile() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.3,
            subscribe_failure_rate: 0.2,
            feed_drop_rate: 0.05,
            duplicate_rate: 0.15,
            reorder_rate: 0.15,
            submit_reject_rate: 0.2,
            submit_latency: (Duration::from_millis(10), Duration::from_millis(800)),
        }
    }
}

/// Faults injected so far
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub fetch_failures: u64,
    pub subscribe_failures: u64,
    pub feed_drops: u64,
    pub duplicates: u64,
    pub reordered: u64,
    pub submit_rejections: u64,
}

impl ChaosStats {
    pub fn total(&self) -> u64 {
        self.fetch_failures
            + self.subscribe_failures
            + self.feed_drops
            + self.duplicates
            + self.reordered
            + self.submit_rejections
    }
}

/// Seeded fault source
pub struct FaultInjector {
    config: ChaosConfig,
    rng: StdRng,
    stats: ChaosStats,
}

impl FaultInjector {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        FaultInjector {
            config,
            rng: StdRng::seed_from_u64(seed),
            stats: ChaosStats::default(),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Swap the fault profile, keeping the random sequence and stats
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn fail_fetch(&mut self) -> bool {
        let hit = self.roll(self.config.fetch_failure_rate);
        self.stats.fetch_failures += hit as u64;
        hit
    }

    pub fn fail_subscribe(&mut self) -> bool {
        let hit = self.roll(self.config.subscribe_failure_rate);
        self.stats.subscribe_failures += hit as u64;
        hit
    }

    pub fn drop_feed(&mut self) -> bool {
        let hit = self.roll(self.config.feed_drop_rate);
        self.stats.feed_drops += hit as u64;
        hit
    }

    pub fn duplicate(&mut self) -> bool {
        let hit = self.roll(self.config.duplicate_rate);
        self.stats.duplicates += hit as u64;
        hit
    }

    pub fn reorder(&mut self) -> bool {
        let hit = self.roll(self.config.reorder_rate);
        self.stats.reordered += hit as u64;
        hit
    }

    pub fn reject_submit(&mut self) -> bool {
        let hit = self.roll(self.config.submit_reject_rate);
        self.stats.submit_rejections += hit as u64;
        hit
    }

    pub fn submit_latency(&mut self) -> Duration {
        let (min, max) = self.config.submit_latency;
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }
}
