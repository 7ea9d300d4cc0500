//! The account-wide throttle.
//!
//! While closed, no bucket may send. Closing is triggered by a global 429 and reopening is
//! automatic. There is exactly one pending reopen timer: a new closure replaces it, and
//! the last closure decides when the gate opens.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, sleep_until},
};

use super::internal_event::{GlobalThrottleEngaged, InternalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed { until: Instant },
}

impl GateState {
    pub const fn is_open(&self) -> bool {
        matches!(self, GateState::Open)
    }
}

#[derive(Debug)]
pub struct GlobalThrottleGate {
    state: Arc<watch::Sender<GateState>>,
    reopen: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GlobalThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalThrottleGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self {
            state: Arc::new(state),
            reopen: Mutex::new(None),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Suspends until the gate is open; returns at once if it already is.
    pub async fn wait(&self) {
        let mut state = self.state.subscribe();
        // `self` owns the sender, so the channel cannot close while we wait.
        let _ = state.wait_for(GateState::is_open).await;
    }

    /// Closes the gate and reopens it after `duration`, replacing any pending reopen.
    ///
    /// Must be called from within a tokio runtime.
    pub fn close(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut reopen = self.reopen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = reopen.take() {
            previous.abort();
        }

        self.state.send_replace(GateState::Closed { until });
        GlobalThrottleEngaged { duration }.emit();

        let state = Arc::clone(&self.state);
        *reopen = Some(tokio::spawn(async move {
            sleep_until(until).await;
            // A newer closure owns the gate now if `until` no longer matches.
            state.send_if_modified(|current| {
                if *current == (GateState::Closed { until }) {
                    *current = GateState::Open;
                    true
                } else {
                    false
                }
            });
        }));
    }

    /// Opens the gate immediately and cancels the pending reopen timer.
    pub fn open(&self) {
        let mut reopen = self.reopen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = reopen.take() {
            previous.abort();
        }
        self.state.send_replace(GateState::Open);
    }
}

impl Drop for GlobalThrottleGate {
    fn drop(&mut self) {
        let reopen = self.reopen.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = reopen.take() {
            timer.abort();
        }
    }
}
