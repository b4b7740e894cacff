//! Store trait definitions
//!
//! These traits define the abstract interface over the real-time keyed
//! backing store, scoped by room. Different implementations can provide
//! different backends (in-process, local emulator, networked) behind the
//! same subscribe/write/transact contract.

pub mod factory;
pub mod memory;

use crate::error::WasherResult;
use crate::model::{Identity, Machine, Notification, Room};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Machine records keyed by machine id
pub type MachineMap = BTreeMap<String, Machine>;

/// Subscription to a room's machine set
///
/// `borrow()` yields the current snapshot immediately after registration;
/// `changed().await` wakes on every subsequent push. Dropping the receiver
/// unsubscribes, after which no further callbacks can observe updates.
pub type MachineWatch = watch::Receiver<MachineMap>;

/// Subscription to a room record
pub type RoomWatch = watch::Receiver<Option<Room>>;

/// Subscription to a recipient's notification inbox
pub type InboxWatch = watch::Receiver<Vec<Notification>>;

/// Updater function for [`MachineStore::transactional_update`]
///
/// Must be pure: a contended backend may invoke it multiple times during an
/// optimistic retry loop. Returning `None` aborts, leaving the stored value
/// unchanged.
pub type MachineUpdater<'a> = &'a (dyn Fn(Option<Machine>) -> Option<Machine> + Send + Sync);

/// Result of a transactional update
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    /// The update was applied. `previous` is the value the updater saw on
    /// the committing attempt, so callers can act on the pre-image.
    Committed {
        previous: Option<Machine>,
        current: Machine,
    },
    /// The updater declined (stale precondition, lost race); nothing was
    /// written.
    Aborted,
}

impl TxOutcome {
    pub fn committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }
}

/// Store operations for rooms and their machine sets
///
/// The transactional update is the sole mutation path for claim/release;
/// plain writes are only safe for fields the writer exclusively owns at that
/// moment.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Subscribe to the room record
    async fn subscribe_room(&self, room_id: &str) -> WasherResult<RoomWatch>;

    /// Write the room record
    async fn write_room(&self, room: &Room) -> WasherResult<()>;

    /// Subscribe to the room's machine set
    async fn subscribe_machines(&self, room_id: &str) -> WasherResult<MachineWatch>;

    /// Read the room's machine set; `None` when the room was never seeded
    async fn read_machines(&self, room_id: &str) -> WasherResult<Option<MachineMap>>;

    /// Replace a single machine record (plain write, no compare step)
    async fn write_machine(&self, room_id: &str, machine: &Machine) -> WasherResult<()>;

    /// Replace the whole machine set (plain write, no compare step)
    async fn write_machine_set(&self, room_id: &str, machines: &MachineMap) -> WasherResult<()>;

    /// Atomic conditional read-modify-write of one machine record
    async fn transactional_update(
        &self,
        room_id: &str,
        machine_id: &str,
        updater: MachineUpdater<'_>,
    ) -> WasherResult<TxOutcome>;

    /// Read a single machine record
    async fn read_machine(
        &self,
        room_id: &str,
        machine_id: &str,
    ) -> WasherResult<Option<Machine>> {
        Ok(self
            .read_machines(room_id)
            .await?
            .and_then(|machines| machines.get(machine_id).cloned()))
    }
}

/// Store operations for per-recipient notification inboxes
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Append a notification to its recipient's inbox
    async fn append_notification(&self, notification: &Notification) -> WasherResult<()>;

    /// Subscribe to a recipient's inbox
    async fn subscribe_notifications(&self, recipient: &Identity) -> WasherResult<InboxWatch>;

    /// Read a recipient's inbox in append order
    async fn read_notifications(&self, recipient: &Identity) -> WasherResult<Vec<Notification>>;

    /// Remove every notification for a recipient
    async fn clear_notifications(&self, recipient: &Identity) -> WasherResult<()>;

    /// Remove the given notifications for a recipient
    async fn remove_notifications(&self, recipient: &Identity, ids: &[Uuid]) -> WasherResult<()>;

    /// Remove every notification that references the given machine
    async fn remove_notifications_for_machine(
        &self,
        recipient: &Identity,
        machine_id: &str,
    ) -> WasherResult<()>;

    /// Mark one notification as seen
    async fn mark_notification_seen(&self, recipient: &Identity, id: Uuid) -> WasherResult<()>;
}

/// Combined store handle the engine and dispatcher are constructed with
pub trait Store: MachineStore + NotificationStore {}

impl<T: MachineStore + NotificationStore> Store for T {}
