//! In-process store backend
//!
//! Implements the full subscribe/write/transact contract over process
//! memory. Useful for local development without a networked store, for UI
//! work against deterministic data, and for integration tests. The
//! compare-and-swap semantics of `transactional_update` are realized by
//! applying the updater under the write lock, so within one process two
//! contending updates serialize and the loser's precondition check sees the
//! winner's committed value.

use super::{
    InboxWatch, MachineMap, MachineStore, MachineUpdater, MachineWatch, NotificationStore,
    RoomWatch, Store, TxOutcome,
};
use crate::error::WasherResult;
use crate::model::{Identity, Machine, Notification, Room};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Per-room slot: the room record, its machine set, and their watchers
struct RoomSlot {
    room: Option<Room>,
    /// `None` until the room is first seeded, mirroring a missing key in the
    /// backing store
    machines: Option<MachineMap>,
    room_tx: watch::Sender<Option<Room>>,
    machines_tx: watch::Sender<MachineMap>,
}

impl RoomSlot {
    fn new() -> Self {
        let (room_tx, _) = watch::channel(None);
        let (machines_tx, _) = watch::channel(MachineMap::new());
        Self {
            room: None,
            machines: None,
            room_tx,
            machines_tx,
        }
    }

    fn publish_machines(&self) {
        self.machines_tx
            .send_replace(self.machines.clone().unwrap_or_default());
    }
}

/// Per-recipient inbox slot
struct InboxSlot {
    list: Vec<Notification>,
    tx: watch::Sender<Vec<Notification>>,
}

impl InboxSlot {
    fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { list: Vec::new(), tx }
    }

    fn publish(&self) {
        self.tx.send_replace(self.list.clone());
    }
}

#[derive(Default)]
struct Inner {
    rooms: BTreeMap<String, RoomSlot>,
    inboxes: BTreeMap<String, InboxSlot>,
}

impl Inner {
    fn room_slot(&mut self, room_id: &str) -> &mut RoomSlot {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomSlot::new)
    }

    fn inbox_slot(&mut self, recipient: &Identity) -> &mut InboxSlot {
        self.inboxes
            .entry(recipient.recipient_key())
            .or_insert_with(InboxSlot::new)
    }
}

/// In-process implementation of the store contract
pub struct MemoryStore {
    inner: tokio::sync::RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(Inner::default()),
        }
    }

    /// Convenience constructor for callers that share the handle
    pub fn shared() -> Arc<dyn Store> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineStore for MemoryStore {
    async fn subscribe_room(&self, room_id: &str) -> WasherResult<RoomWatch> {
        let mut inner = self.inner.write().await;
        Ok(inner.room_slot(room_id).room_tx.subscribe())
    }

    async fn write_room(&self, room: &Room) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.room_slot(&room.id);
        slot.room = Some(room.clone());
        slot.room_tx.send_replace(slot.room.clone());
        Ok(())
    }

    async fn subscribe_machines(&self, room_id: &str) -> WasherResult<MachineWatch> {
        let mut inner = self.inner.write().await;
        Ok(inner.room_slot(room_id).machines_tx.subscribe())
    }

    async fn read_machines(&self, room_id: &str) -> WasherResult<Option<MachineMap>> {
        let inner = self.inner.read().await;
        Ok(inner.rooms.get(room_id).and_then(|slot| {
            slot.machines.as_ref().map(|machines| {
                let mut normalized = machines.clone();
                for machine in normalized.values_mut() {
                    machine.normalize();
                }
                normalized
            })
        }))
    }

    async fn write_machine(&self, room_id: &str, machine: &Machine) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.room_slot(room_id);
        slot.machines
            .get_or_insert_with(MachineMap::new)
            .insert(machine.id.clone(), machine.clone());
        slot.publish_machines();
        Ok(())
    }

    async fn write_machine_set(&self, room_id: &str, machines: &MachineMap) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.room_slot(room_id);
        slot.machines = Some(machines.clone());
        slot.publish_machines();
        Ok(())
    }

    async fn transactional_update(
        &self,
        room_id: &str,
        machine_id: &str,
        updater: MachineUpdater<'_>,
    ) -> WasherResult<TxOutcome> {
        let mut inner = self.inner.write().await;
        let slot = inner.room_slot(room_id);
        let previous = slot
            .machines
            .as_ref()
            .and_then(|machines| machines.get(machine_id).cloned());

        match updater(previous.clone()) {
            None => Ok(TxOutcome::Aborted),
            Some(next) => {
                slot.machines
                    .get_or_insert_with(MachineMap::new)
                    .insert(machine_id.to_string(), next.clone());
                slot.publish_machines();
                Ok(TxOutcome::Committed {
                    previous,
                    current: next,
                })
            }
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn append_notification(&self, notification: &Notification) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.inbox_slot(&notification.recipient_identity);
        slot.list.push(notification.clone());
        slot.publish();
        Ok(())
    }

    async fn subscribe_notifications(&self, recipient: &Identity) -> WasherResult<InboxWatch> {
        let mut inner = self.inner.write().await;
        Ok(inner.inbox_slot(recipient).tx.subscribe())
    }

    async fn read_notifications(&self, recipient: &Identity) -> WasherResult<Vec<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner
            .inboxes
            .get(&recipient.recipient_key())
            .map(|slot| slot.list.clone())
            .unwrap_or_default())
    }

    async fn clear_notifications(&self, recipient: &Identity) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.inbox_slot(recipient);
        slot.list.clear();
        slot.publish();
        Ok(())
    }

    async fn remove_notifications(&self, recipient: &Identity, ids: &[Uuid]) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.inbox_slot(recipient);
        slot.list.retain(|n| !ids.contains(&n.id));
        slot.publish();
        Ok(())
    }

    async fn remove_notifications_for_machine(
        &self,
        recipient: &Identity,
        machine_id: &str,
    ) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.inbox_slot(recipient);
        slot.list
            .retain(|n| n.machine_id.as_deref() != Some(machine_id));
        slot.publish();
        Ok(())
    }

    async fn mark_notification_seen(&self, recipient: &Identity, id: Uuid) -> WasherResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner.inbox_slot(recipient);
        if let Some(notification) = slot.list.iter_mut().find(|n| n.id == id) {
            notification.seen = true;
        }
        slot.publish();
        Ok(())
    }
}
