//! One-shot wait for the next matching event.

use std::time::Duration;

use tokio::task::JoinHandle;

use ensemble_core::bus::Subscription;
use ensemble_core::envelope::Message;
use ensemble_core::error::BusError;
use ensemble_core::event::{Schema, Scope};

/// Takes the first envelope delivered to a subscription.
///
/// The subscription is drained in a background task from construction, so
/// events published after the waiter exists are never missed. `wait`
/// resolves with the first delivery; on timeout the scope is closed and
/// [`BusError::Timeout`] is raised.
pub struct Waiter<S, T, M = ()> {
    handle: JoinHandle<Option<Message<S, T, M>>>,
}

impl<S: Scope, T: Schema, M: Schema> Waiter<S, T, M> {
    /// Start waiting on the subscription in the background.
    pub fn new(mut subscription: Subscription<S, T, M>) -> Self {
        let handle = tokio::spawn(async move { subscription.next().await });
        Self { handle }
    }

    /// Resolve with the first delivered envelope.
    ///
    /// Fails with [`BusError::Timeout`] when `timeout` expires first and
    /// with [`BusError::NoReply`] when the subscription scope closed
    /// without a delivery.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Message<S, T, M>, BusError> {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.handle).await {
                Ok(result) => result,
                Err(_) => {
                    self.handle.abort();
                    return Err(BusError::Timeout);
                }
            },
            None => (&mut self.handle).await,
        };
        match result {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BusError::NoReply),
            Err(err) => Err(BusError::transport(err)),
        }
    }
}
