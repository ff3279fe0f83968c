//! Channel-backed event subscriptions

use tokio::sync::mpsc;

/// Stream of events from a collaborator (chain or broadcast channel).
///
/// `unsubscribe` detaches the subscription from its source and may be called
/// any number of times. Dropping the subscription unsubscribes as well.
pub struct EventSubscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> EventSubscription<T> {
    /// Wrap a receiver together with the callback that detaches its sender
    pub fn new(
        receiver: mpsc::UnboundedReceiver<T>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Wait for the next event. `None` once unsubscribed or the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take an already delivered event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            self.receiver.close();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }
}

impl<T> Drop for EventSubscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
