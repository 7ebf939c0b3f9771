//! Cooperative shutdown of pollers.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Coordinates clean shutdown of long-poll loops.
///
/// Each poller registers a named (stop, ack) channel pair. [`stop_pollers`]
/// broadcasts a stop to every registered poller in registration order, then
/// waits for each ack in the same order; with long polls in flight that can
/// take up to a full poll window. Channels MUST be buffered (capacity >= 1)
/// so the broadcast cannot block on a poller that is mid-poll.
///
/// [`stop_pollers`]: ShutdownManager::stop_pollers
#[derive(Debug, Default)]
pub struct ShutdownManager {
    registered: Mutex<Vec<RegisteredPoller>>,
}

#[derive(Debug)]
struct RegisteredPoller {
    name: String,
    stop: mpsc::Sender<()>,
    ack: mpsc::Receiver<()>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        ShutdownManager::default()
    }

    /// Register a named (stop, ack) pair. Re-registering a name replaces the
    /// previous registration.
    pub fn register(&self, name: impl Into<String>, stop: mpsc::Sender<()>, ack: mpsc::Receiver<()>) {
        let name = name.into();
        let mut registered = self.registered.lock();
        registered.retain(|p| p.name != name);
        registered.push(RegisteredPoller { name, stop, ack });
    }

    /// Remove a registration without stopping the poller.
    pub fn deregister(&self, name: &str) {
        self.registered.lock().retain(|p| p.name != name);
    }

    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }

    /// Stop every registered poller and wait for each to ack. Registrations
    /// are cleared once all acks are in.
    pub async fn stop_pollers(&self) {
        let mut pollers: Vec<RegisteredPoller> = {
            let mut registered = self.registered.lock();
            registered.drain(..).collect()
        };

        info!(pollers = pollers.len(), "stopping pollers");
        for poller in &pollers {
            debug!(name = %poller.name, "sending stop");
            // buffered channel: this only fails if the poller is gone, which
            // is as stopped as it gets
            let _ = poller.stop.try_send(());
        }
        for poller in &mut pollers {
            debug!(name = %poller.name, "awaiting stop ack");
            let _ = poller.ack.recv().await;
            debug!(name = %poller.name, "stop acked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_pollers_ordered_broadcast_then_ack() {
        let manager = ShutdownManager::new();

        let (stop1_tx, mut stop1_rx) = mpsc::channel::<()>(1);
        let (ack1_tx, ack1_rx) = mpsc::channel::<()>(1);
        let (stop2_tx, mut stop2_rx) = mpsc::channel::<()>(1);
        let (ack2_tx, ack2_rx) = mpsc::channel::<()>(1);

        manager.register("p1", stop1_tx, ack1_rx);
        manager.register("p2", stop2_tx, ack2_rx);
        assert_eq!(manager.registered_count(), 2);

        // simulate both pollers: receive stop, then ack
        let p1 = tokio::spawn(async move {
            stop1_rx.recv().await.unwrap();
            ack1_tx.send(()).await.unwrap();
        });
        let p2 = tokio::spawn(async move {
            stop2_rx.recv().await.unwrap();
            ack2_tx.send(()).await.unwrap();
        });

        tokio::time::timeout(Duration::from_secs(1), manager.stop_pollers())
            .await
            .unwrap();

        p1.await.unwrap();
        p2.await.unwrap();
        assert_eq!(manager.registered_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_pollers_returns_only_after_all_acks() {
        let manager = ShutdownManager::new();

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
        manager.register("slow", stop_tx, ack_rx);

        let acked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acked_clone = acked.clone();
        tokio::spawn(async move {
            stop_rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            acked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            ack_tx.send(()).await.unwrap();
        });

        manager.stop_pollers().await;
        assert!(acked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_buffered_stop_survives_busy_poller() {
        // a poller that never reads its stop channel must not block the
        // broadcast; the buffered send is enough
        let manager = ShutdownManager::new();

        let (stop_tx, _stop_rx) = mpsc::channel::<()>(1);
        let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
        manager.register("busy", stop_tx, ack_rx);

        // ack preemptively so stop_pollers can finish
        ack_tx.send(()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), manager.stop_pollers())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deregister() {
        let manager = ShutdownManager::new();
        let (stop_tx, _stop_rx) = mpsc::channel::<()>(1);
        let (_ack_tx, ack_rx) = mpsc::channel::<()>(1);
        manager.register("p1", stop_tx, ack_rx);
        manager.deregister("p1");
        assert_eq!(manager.registered_count(), 0);

        // stopping with nothing registered is a no-op
        manager.stop_pollers().await;
    }
}
