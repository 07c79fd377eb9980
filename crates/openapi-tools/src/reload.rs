//! Rebuild coalescing.
//!
//! At most one rebuild runs at a time. Triggers that arrive while one is running collapse into a
//! single follow-up run, so a burst of file changes costs two rebuilds, not one per change.

use parking_lot::Mutex;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// This caller ran the rebuild (and any follow-ups requested meanwhile).
    Ran,
    /// A rebuild was already running; it will run once more after it finishes.
    Coalesced,
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    pending: bool,
}

#[derive(Debug, Default)]
pub struct RebuildCoalescer {
    state: Mutex<State>,
}

impl RebuildCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `rebuild`, or mark a follow-up run if one is already in flight.
    pub async fn trigger<F, Fut>(&self, mut rebuild: F) -> RebuildOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        {
            let mut state = self.state.lock();
            if state.running {
                state.pending = true;
                return RebuildOutcome::Coalesced;
            }
            state.running = true;
        }

        // Clears `running` if this future is dropped mid-rebuild.
        let mut guard = RunningGuard {
            state: &self.state,
            armed: true,
        };
        loop {
            rebuild().await;
            let mut state = self.state.lock();
            if !state.pending {
                state.running = false;
                guard.armed = false;
                break;
            }
            state.pending = false;
        }
        RebuildOutcome::Ran
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

struct RunningGuard<'a> {
    state: &'a Mutex<State>,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.running = false;
            state.pending = false;
        }
    }
}
