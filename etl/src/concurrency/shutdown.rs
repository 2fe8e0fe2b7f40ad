//! Shutdown signalling between the binary and long running loops.

use tokio::sync::watch;

/// Receiving side of the shutdown signal. `changed()` resolves once shutdown is requested.
pub type ShutdownRx = watch::Receiver<()>;

/// Sending side of the shutdown signal, cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Notifies every subscribed loop. Safe to call more than once.
    pub fn shutdown(&self) {
        self.0.send_replace(());
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a shutdown channel. Receivers start out with no pending signal.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_the_signal() {
        let (tx, mut rx) = create_shutdown_channel();
        let mut late = tx.subscribe();

        assert!(!rx.has_changed().unwrap());

        tx.shutdown();

        rx.changed().await.unwrap();
        late.changed().await.unwrap();
    }
}
