//! Room/session coordination
//!
//! Owns "which room is active" and keeps the locally observed machine set in
//! sync with the store's pushed updates. When the active room changes, the
//! previous machine-set subscription is dropped before the new one is
//! registered, and an empty room is seeded with the default blank catalog.

use crate::error::WasherResult;
use crate::model::Machine;
use crate::store::{MachineMap, MachineWatch, Store};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The fixed catalog a fresh room starts with
pub fn default_catalog() -> MachineMap {
    let mut machines = MachineMap::new();
    for (id, label) in [
        ("w1", "W1"),
        ("w2", "W2"),
        ("w3", "W3"),
        ("d1", "D1"),
        ("d2", "D2"),
    ] {
        machines.insert(id.to_string(), Machine::blank(id, label));
    }
    machines
}

struct ActiveRoom {
    room_id: String,
    watch: MachineWatch,
}

/// Tracks the active room and its machine-set subscription
pub struct RoomCoordinator {
    store: Arc<dyn Store>,
    active: Mutex<Option<ActiveRoom>>,
}

impl RoomCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            active: Mutex::new(None),
        }
    }

    /// Switch the active room
    ///
    /// Unsubscribes from the previous machine-set stream, seeds the room
    /// with the default catalog if the store has no data for it, and returns
    /// the new subscription. The returned watch carries the current snapshot
    /// immediately.
    pub async fn set_room(&self, room_id: &str) -> WasherResult<MachineWatch> {
        let mut active = self.active.lock().await;
        // Drop the previous subscription first so its callbacks can no
        // longer observe updates.
        active.take();

        if self.store.read_machines(room_id).await?.is_none() {
            self.seed_room(room_id).await?;
        }

        let watch = self.store.subscribe_machines(room_id).await?;
        *active = Some(ActiveRoom {
            room_id: room_id.to_string(),
            watch: watch.clone(),
        });
        Ok(watch)
    }

    /// Seed the default catalog into a room, idempotently
    ///
    /// Each machine is inserted with a conditional update that aborts when
    /// the key already exists, so racing with another client's seeding (or
    /// with live data) never clobbers an existing record.
    pub async fn seed_room(&self, room_id: &str) -> WasherResult<()> {
        for (machine_id, machine) in default_catalog() {
            self.store
                .transactional_update(room_id, &machine_id, &|current| match current {
                    None => Some(machine.clone()),
                    Some(_) => None,
                })
                .await?;
        }
        tracing::debug!(room = room_id, "room seeded");
        Ok(())
    }

    /// Active room id, shareable as a URL parameter so reloads keep context
    pub async fn active_room_id(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.room_id.clone())
    }

    /// Last-synced snapshot of the active room's machine set
    pub async fn snapshot(&self) -> Option<MachineMap> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.watch.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, MachineState};
    use crate::store::memory::MemoryStore;
    use crate::store::MachineStore;

    fn coordinator() -> (Arc<dyn Store>, RoomCoordinator) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let coordinator = RoomCoordinator::new(store.clone());
        (store, coordinator)
    }

    #[tokio::test]
    async fn test_set_room_seeds_empty_room() {
        let (store, coordinator) = coordinator();

        let watch = coordinator.set_room("laundry-a").await.unwrap();
        assert_eq!(watch.borrow().len(), 5);
        assert_eq!(
            coordinator.active_room_id().await.as_deref(),
            Some("laundry-a")
        );

        let machines = store.read_machines("laundry-a").await.unwrap().unwrap();
        assert!(machines.values().all(|m| m.is_available()));
    }

    #[tokio::test]
    async fn test_seeding_never_clobbers_live_data() {
        let (store, coordinator) = coordinator();

        // Another client already claimed w1 in this room.
        let mut claimed = Machine::blank("w1", "W1");
        claimed.state = MachineState::InUse;
        claimed.owner_identity = Some(Identity::new("alice@example.com"));
        store.write_machine("laundry-a", &claimed).await.unwrap();

        coordinator.seed_room("laundry-a").await.unwrap();

        let machines = store.read_machines("laundry-a").await.unwrap().unwrap();
        assert_eq!(machines.len(), 5);
        assert_eq!(machines["w1"].state, MachineState::InUse);
        assert!(machines["w2"].is_available());
    }

    #[tokio::test]
    async fn test_switching_rooms_replaces_subscription() {
        let (store, coordinator) = coordinator();

        coordinator.set_room("laundry-a").await.unwrap();
        let watch_b = coordinator.set_room("laundry-b").await.unwrap();
        assert_eq!(
            coordinator.active_room_id().await.as_deref(),
            Some("laundry-b")
        );

        // Updates to the new room reach the new watch.
        let mut machine = Machine::blank("w1", "W1");
        machine.state = MachineState::Finished;
        store.write_machine("laundry-b", &machine).await.unwrap();

        let mut watch_b = watch_b;
        watch_b.changed().await.unwrap();
        assert_eq!(watch_b.borrow()["w1"].state, MachineState::Finished);
    }

    #[tokio::test]
    async fn test_snapshot_tracks_pushed_updates() {
        let (store, coordinator) = coordinator();
        coordinator.set_room("laundry-a").await.unwrap();

        let mut machine = Machine::blank("d1", "D1");
        machine.state = MachineState::InUse;
        store.write_machine("laundry-a", &machine).await.unwrap();

        let snapshot = coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot["d1"].state, MachineState::InUse);
    }
}
