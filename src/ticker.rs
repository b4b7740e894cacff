//! Periodic tick driver
//!
//! Re-evaluates a room's machine timers on a fixed period. A tick pass is
//! serialized against itself with a try-lock guard (a new pass is skipped
//! while the previous one's writes are still in flight) but not against
//! user-triggered actions; per-machine correctness under that interleaving
//! comes from the store's transactional update.

use crate::engine::MachineEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running ticker; dropping it stops the task
pub struct TickerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Stop the ticker gracefully
    pub fn shutdown(self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns tick passes over one room
pub struct Ticker;

impl Ticker {
    pub fn spawn(
        engine: Arc<MachineEngine>,
        room_id: impl Into<String>,
        period: Duration,
    ) -> TickerHandle {
        let room_id = room_id.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let guard = Arc::new(Mutex::new(()));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match guard.clone().try_lock_owned() {
                            Ok(permit) => {
                                let engine = engine.clone();
                                let room = room_id.clone();
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    if let Err(e) = engine.tick(&room).await {
                                        tracing::warn!(room = %room, error = %e, "tick pass failed");
                                    }
                                });
                            }
                            Err(_) => {
                                tracing::debug!(room = %room_id, "previous tick still in flight; skipping");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        TickerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::model::{Identity, MachineState};
    use crate::notify::NotificationDispatcher;
    use crate::store::memory::MemoryStore;
    use crate::store::{MachineStore, Store};

    #[tokio::test]
    async fn test_ticker_autocompletes_elapsed_machine() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(store.clone(), None));
        let engine = Arc::new(MachineEngine::new(
            store.clone(),
            dispatcher,
            EngineConfig::default(),
        ));

        store
            .write_machine("laundry-a", &crate::model::Machine::blank("w1", "W1"))
            .await
            .unwrap();
        let alice = Identity::new("alice@example.com");
        // 0.001 min = 60 ms cycle.
        engine
            .start_machine("laundry-a", "w1", &alice, None, 0.001)
            .await
            .unwrap();

        let handle = Ticker::spawn(engine, "laundry-a", Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.shutdown();

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.state, MachineState::Finished);
        assert!(machine.completed_at.is_some());
    }
}
