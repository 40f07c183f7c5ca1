//! Configuration for the control point stack
//!
//! Controls search timing, subscription durations, description fetching and
//! how network adapters are chosen and watched.

use std::net::Ipv4Addr;
use std::time::Duration;

use netif::{LoopbackPolicy, RetryPolicy};

use crate::error::{ControlPointError, Result};

/// Configuration for a [`ControlPointStack`](crate::ControlPointStack)
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// MX value of every M-SEARCH, and the base of the refresh grace window.
    /// Default: 3 seconds
    pub msearch_time_secs: u32,

    /// How long to keep re-searching after binding to a new adapter.
    /// Default: 60 seconds
    pub max_msearch_retry_secs: u32,

    /// Duration requested for event subscriptions.
    /// Default: 1800 seconds (30 minutes)
    pub subscription_duration_secs: u32,

    /// Subnet the current adapter is chosen from. `None` takes the first
    /// adapter enumerated.
    /// Default: None
    pub default_subnet: Option<Ipv4Addr>,

    /// Whether loopback adapters are considered.
    /// Default: excluded
    pub loopback: LoopbackPolicy,

    /// Timeout for one description fetch.
    /// Default: 10 seconds
    pub fetch_timeout: Duration,

    /// Number of description fetch threads.
    /// Default: 4
    pub fetch_workers: usize,

    /// Interval between adapter snapshots taken by the interface watcher.
    /// Default: 5 seconds
    pub adapter_poll_interval: Duration,

    /// Backoff schedule for adapter-change listeners that fail.
    /// Default: 100ms doubling up to 30s, 11 retries
    pub adapter_retry: RetryPolicy,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            msearch_time_secs: 3,
            max_msearch_retry_secs: 60,
            subscription_duration_secs: 1800,
            default_subnet: None,
            loopback: LoopbackPolicy::Exclude,
            fetch_timeout: Duration::from_secs(10),
            fetch_workers: 4,
            adapter_poll_interval: Duration::from_secs(5),
            adapter_retry: RetryPolicy::default(),
        }
    }
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short search windows for interactive tools
    pub fn fast_discovery() -> Self {
        Self {
            msearch_time_secs: 1,
            max_msearch_retry_secs: 10,
            fetch_timeout: Duration::from_secs(3),
            ..Default::default()
        }
    }

    /// Discovery restricted to loopback adapters, for local testing
    pub fn loopback_only() -> Self {
        Self {
            loopback: LoopbackPolicy::Only,
            ..Default::default()
        }
    }

    pub fn with_msearch_time_secs(mut self, secs: u32) -> Self {
        self.msearch_time_secs = secs;
        self
    }

    pub fn with_max_msearch_retry_secs(mut self, secs: u32) -> Self {
        self.max_msearch_retry_secs = secs;
        self
    }

    pub fn with_subscription_duration_secs(mut self, secs: u32) -> Self {
        self.subscription_duration_secs = secs;
        self
    }

    pub fn with_default_subnet(mut self, subnet: Ipv4Addr) -> Self {
        self.default_subnet = Some(subnet);
        self
    }

    pub fn with_loopback(mut self, loopback: LoopbackPolicy) -> Self {
        self.loopback = loopback;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_fetch_workers(mut self, workers: usize) -> Self {
        self.fetch_workers = workers;
        self
    }

    pub fn with_adapter_poll_interval(mut self, interval: Duration) -> Self {
        self.adapter_poll_interval = interval;
        self
    }

    pub fn with_adapter_retry(mut self, retry: RetryPolicy) -> Self {
        self.adapter_retry = retry;
        self
    }

    /// Number of follow-up searches after binding to a new adapter,
    /// `(max_msearch_retry_secs + t - 1) / (2 * t)` with `t` the search time.
    pub fn pending_refresh_count(&self) -> u32 {
        let msearch = self.msearch_time_secs.max(1);
        (self.max_msearch_retry_secs + msearch - 1) / (2 * msearch)
    }

    /// Delay before a refresh is reconciled, in milliseconds.
    pub fn refresh_grace_ms(&self) -> u64 {
        u64::from(self.msearch_time_secs) * 1000 + 100
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.msearch_time_secs) {
            return Err(ControlPointError::Configuration(format!(
                "msearch_time_secs must be between 1 and 5, got {}",
                self.msearch_time_secs
            )));
        }

        if self.subscription_duration_secs == 0 {
            return Err(ControlPointError::Configuration(
                "Subscription duration must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout == Duration::ZERO {
            return Err(ControlPointError::Configuration(
                "Fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch_workers == 0 {
            return Err(ControlPointError::Configuration(
                "Fetch workers must be greater than 0".to_string(),
            ));
        }

        if self.adapter_poll_interval == Duration::ZERO {
            return Err(ControlPointError::Configuration(
                "Adapter poll interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
