//! FIFO admission to the browser surface.
//!
//! Whoever holds a [`GatePass`] owns the surface. Dropping the pass hands it
//! straight to the oldest waiter, so the surface is never free while someone
//! is queued and waiters are served strictly in submission order.

use crate::error::ChallengeError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

struct Waiter {
    source_id: String,
    tx: oneshot::Sender<GatePass>,
}

#[derive(Default)]
struct GateState {
    busy: bool,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct GateInner {
    state: Mutex<GateState>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct SurfaceGate {
    inner: Arc<GateInner>,
}

/// Exclusive right to drive the surface
pub struct GatePass {
    inner: Arc<GateInner>,
    armed: bool,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        if self.armed {
            hand_off(&self.inner);
        }
    }
}

fn hand_off(inner: &Arc<GateInner>) {
    let mut state = inner.lock();
    while let Some(waiter) = state.waiters.pop_front() {
        let pass = GatePass {
            inner: inner.clone(),
            armed: true,
        };
        match waiter.tx.send(pass) {
            Ok(()) => return,
            // Waiter gave up; its pass must not hand off again
            Err(mut pass) => pass.armed = false,
        }
    }
    state.busy = false;
}

impl SurfaceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of the surface.
    ///
    /// Fails with a cancelled [`ChallengeError`] when the request is removed
    /// from the queue by [`SurfaceGate::cancel_waiting`].
    pub async fn acquire(&self, source_id: &str) -> Result<GatePass, ChallengeError> {
        let rx = {
            let mut state = self.inner.lock();
            if !state.busy {
                state.busy = true;
                return Ok(GatePass {
                    inner: self.inner.clone(),
                    armed: true,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                source_id: source_id.to_string(),
                tx,
            });
            log::debug!(
                "Challenge for {} queued behind {} others",
                source_id,
                state.waiters.len()
            );
            rx
        };
        rx.await.map_err(|_| ChallengeError::cancelled())
    }

    /// Drop every queued request for `source_id`; returns how many were dropped
    pub fn cancel_waiting(&self, source_id: &str) -> usize {
        let mut state = self.inner.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| w.source_id != source_id);
        before - state.waiters.len()
    }

    /// Source ids waiting for the surface, oldest first
    pub fn waiting(&self) -> Vec<String> {
        self.inner
            .lock()
            .waiters
            .iter()
            .map(|w| w.source_id.clone())
            .collect()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().busy
    }
}
