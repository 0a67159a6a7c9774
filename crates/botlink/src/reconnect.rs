//! Reconnect timer for the connection actor.

use std::{future, pin::Pin, time::Duration};

use tokio::time::{Sleep, sleep};

/// Owns the single reconnect timer of a client and the flag that allows it.
///
/// The connection actor polls [`ReconnectScheduler::fired`] in its select
/// loop; the timer does not start a connection by itself.
#[derive(Debug)]
pub struct ReconnectScheduler {
    delay: Duration,
    should_reconnect: bool,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            should_reconnect: true,
            timer: None,
        }
    }

    /// Arm the timer.
    ///
    /// Returns `false` without doing anything when a reconnect is already
    /// pending or reconnecting was disabled by a deliberate disconnect.
    pub fn schedule(&mut self) -> bool {
        if !self.should_reconnect || self.timer.is_some() {
            return false;
        }
        self.timer = Some(Box::pin(sleep(self.delay)));
        true
    }

    /// Drop a pending timer, keeping the flag as is.
    pub fn cancel(&mut self) {
        self.timer = None;
    }

    /// Stop reconnecting until [`enable`](Self::enable) is called.
    pub fn disable(&mut self) {
        self.should_reconnect = false;
        self.timer = None;
    }

    pub fn enable(&mut self) {
        self.should_reconnect = true;
    }

    #[cfg(test)]
    fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// When the pending timer fires, if one is armed.
    #[cfg(test)]
    fn deadline(&self) -> Option<tokio::time::Instant> {
        self.timer.as_ref().map(|timer| timer.deadline())
    }

    /// Resolve once the armed timer elapses; pending forever when unarmed.
    ///
    /// Cancel safe: dropping the future keeps the timer armed.
    pub async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
            }
            None => future::pending().await,
        }
    }
}
