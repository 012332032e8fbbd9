//! Shutdown signalling between the server handle and its tasks.

use tokio::sync::watch;

/// Sending side, owned by the server handle.
#[derive(Debug)]
pub(crate) struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

/// Receiving side, cloned into the accept loop and every connection task.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

/// Create a connected trigger/signal pair.
pub(crate) fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, ShutdownSignal { receiver })
}

impl ShutdownTrigger {
    /// Signal shutdown. Repeated calls have no further effect.
    pub(crate) fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl ShutdownSignal {
    /// Whether shutdown has been signalled.
    pub(crate) fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is signalled or the trigger is dropped.
    pub(crate) async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clone_taken_after_trigger_still_fires() {
        let (trigger, signal) = channel();
        trigger.trigger();
        trigger.trigger();

        let mut late = signal.clone();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }
}
