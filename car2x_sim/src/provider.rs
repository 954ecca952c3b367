//! Location provider driven by the simulation script.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

use car2x_core::{LocationFix, LocationProvider, Priority, Subscription, UpdateRequest};
use car2x_env::{cancel_pair, CancelToken};

struct Subscriber {
    request: UpdateRequest,
    updates: mpsc::Sender<LocationFix>,
    token: CancelToken,
}

/// Provider whose fixes are pushed by the scenario.
///
/// A pushed fix goes to every live subscription of the given priority.
/// The one-shot request answers with the most recently pushed fix.
#[derive(Default)]
pub struct ScriptedProvider {
    latest: Mutex<Option<LocationFix>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `fix` to live subscriptions with `priority`; returns how many received it.
    pub fn push(&self, priority: Priority, fix: LocationFix) -> usize {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(fix);

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.token.is_cancelled());
        subscribers
            .iter()
            .filter(|s| s.request.priority == priority)
            .filter(|s| s.updates.try_send(fix).is_ok())
            .count()
    }

    /// Live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.token.is_cancelled())
            .count()
    }
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    async fn current_fix(&self, _priority: Priority) -> Option<LocationFix> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_updates(
        &self,
        request: UpdateRequest,
        updates: mpsc::Sender<LocationFix>,
    ) -> Subscription {
        trace!(?request.priority, "subscription added");
        let (cancel, token) = cancel_pair();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                request,
                updates,
                token,
            });
        Subscription::new(cancel)
    }
}
