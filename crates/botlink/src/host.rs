//! Endpoint failover policy.

use crate::config::Endpoint;

/// Decides which endpoint the next connection attempt dials.
///
/// The primary is preferred. Once it has failed `threshold` times in a row
/// since the last successful connect, and a fallback is configured, the
/// attempt following a primary attempt goes to the fallback. A failed
/// fallback attempt hands the next one back to the primary, so the two
/// alternate until something connects.
#[derive(Debug)]
pub struct HostSelector {
    primary: Endpoint,
    fallback: Option<Endpoint>,
    threshold: u32,
    failures: u32,
    last_used_primary: bool,
}

impl HostSelector {
    pub fn new(primary: Endpoint, fallback: Option<Endpoint>, threshold: u32) -> Self {
        Self {
            primary,
            fallback,
            threshold,
            failures: 0,
            last_used_primary: true,
        }
    }

    /// Pick the endpoint for the next attempt and remember which one it was.
    pub fn choose_endpoint(&mut self) -> Endpoint {
        let use_fallback = self.last_used_primary && self.failures >= self.threshold;
        match &self.fallback {
            Some(fallback) if use_fallback => {
                self.last_used_primary = false;
                fallback.clone()
            }
            _ => {
                self.last_used_primary = true;
                self.primary.clone()
            }
        }
    }

    /// Count a failed attempt. Only failures against the primary are counted.
    pub fn record_failure(&mut self, endpoint: &Endpoint) {
        if *endpoint == self.primary {
            self.failures = self.failures.saturating_add(1);
        }
    }

    /// Reset the failure counter after a successful connect to either endpoint.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures against the primary.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }
}
