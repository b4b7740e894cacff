//! Machine reservation state machine
//!
//! Enforces the legal lifecycle transitions (`available → in-use → finished
//! → available`) and the timing logic around them. Claim and release go
//! through the store's transactional update so concurrent clients cannot
//! both succeed; a lost race is a routine outcome reported as `false`, never
//! an error. Reminder bookkeeping uses a plain write because at that moment
//! the finished machine's reminder fields have a single writer.

use crate::config::TimingConfig;
use crate::error::{WasherError, WasherResult};
use crate::model::{minutes_to_duration, Identity, Machine, MachineState, NotificationKind};
use crate::notify::NotificationDispatcher;
use crate::store::{Store, TxOutcome};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Engine tuning parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum gap between reminders aimed at the same machine's owner
    pub reminder_throttle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_throttle: Duration::seconds(
                crate::config::DEFAULT_REMINDER_THROTTLE_SECS as i64,
            ),
        }
    }
}

impl From<&TimingConfig> for EngineConfig {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            reminder_throttle: timing.reminder_throttle(),
        }
    }
}

/// The reservation state engine
pub struct MachineEngine {
    store: Arc<dyn Store>,
    dispatcher: Arc<NotificationDispatcher>,
    config: EngineConfig,
}

impl MachineEngine {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<NotificationDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    async fn require_machine(&self, room_id: &str, machine_id: &str) -> WasherResult<Machine> {
        self.store
            .read_machine(room_id, machine_id)
            .await?
            .ok_or_else(|| WasherError::MachineNotFound(machine_id.to_string()))
    }

    /// Claim a machine and start a cycle
    ///
    /// Any positive duration is accepted; the UI menu is not an engine
    /// concern. Returns `Ok(false)` when another identity holds the machine
    /// (lost race or already claimed). A second `start` by the current owner
    /// of an in-use machine refreshes the cycle instead of failing.
    pub async fn start_machine(
        &self,
        room_id: &str,
        machine_id: &str,
        identity: &Identity,
        display_name: Option<&str>,
        duration_min: f64,
    ) -> WasherResult<bool> {
        if !(duration_min > 0.0) {
            return Err(WasherError::CycleDurationInvalid(duration_min));
        }
        self.require_machine(room_id, machine_id).await?;

        let now = Utc::now();
        let claimant = identity.clone();
        let display = display_name.map(|d| d.to_string());

        let outcome = self
            .store
            .transactional_update(room_id, machine_id, &|current| {
                let mut machine = current?;
                let same_owner_refresh = machine.state == MachineState::InUse
                    && machine.owner_identity.as_ref() == Some(&claimant);
                if !machine.is_available() && !same_owner_refresh {
                    return None;
                }
                machine.state = MachineState::InUse;
                machine.owner_identity = Some(claimant.clone());
                machine.owner_display_name = display.clone();
                machine.start_time = Some(now);
                machine.duration_min = Some(duration_min);
                machine.expected_finish_time = Some(now + minutes_to_duration(duration_min));
                machine.completed_at = None;
                machine.completion_notified_at = None;
                machine.last_reminder_sent = None;
                machine.reminder_count = 0;
                // The owner never appears in their own machine's subscriber set.
                machine.reminder_subscribers.remove(&claimant);
                Some(machine)
            })
            .await?;

        Ok(outcome.committed())
    }

    /// Release a machine back to available (owner pickup)
    ///
    /// Keyed on current ownership so a stale client cannot release a machine
    /// it no longer owns. On success, every reminder subscriber except the
    /// owner is notified that the machine is free, then all owner/timing/
    /// reminder fields reset to their blank defaults.
    pub async fn finish_machine(
        &self,
        room_id: &str,
        machine_id: &str,
        identity: &Identity,
    ) -> WasherResult<bool> {
        self.require_machine(room_id, machine_id).await?;

        let releaser = identity.clone();
        let outcome = self
            .store
            .transactional_update(room_id, machine_id, &|current| {
                let machine = current?;
                if machine.is_available() {
                    return None;
                }
                if machine.owner_identity.as_ref() != Some(&releaser) {
                    return None;
                }
                let mut next = machine;
                next.reset();
                Some(next)
            })
            .await?;

        let previous = match outcome {
            TxOutcome::Committed { previous, .. } => previous,
            TxOutcome::Aborted => return Ok(false),
        };

        if let Some(prev) = previous {
            let message = format!("{} is now available", prev.label);
            for subscriber in &prev.reminder_subscribers {
                if subscriber == identity {
                    continue;
                }
                if let Err(e) = self
                    .dispatcher
                    .send(
                        NotificationKind::Pickup,
                        subscriber,
                        &message,
                        Some(machine_id),
                        Some(identity),
                    )
                    .await
                {
                    tracing::warn!(
                        machine = machine_id,
                        subscriber = %subscriber,
                        error = %e,
                        "failed to deliver pickup notification"
                    );
                }
            }
        }
        Ok(true)
    }

    /// One evaluation pass over the room's machines
    ///
    /// Flips every elapsed in-use machine to finished. The flip and the
    /// completion-notification guard are claimed in the same transactional
    /// update, so across repeated ticks and concurrent clients the owner is
    /// notified exactly once per cycle. Returns how many machines completed.
    pub async fn tick(&self, room_id: &str) -> WasherResult<usize> {
        let machines = match self.store.read_machines(room_id).await? {
            Some(machines) => machines,
            None => return Ok(0),
        };

        let now = Utc::now();
        let mut completed = 0;

        for (machine_id, snapshot) in machines {
            if snapshot.state != MachineState::InUse || !snapshot.cycle_elapsed(now) {
                continue;
            }

            let outcome = self
                .store
                .transactional_update(room_id, &machine_id, &|current| {
                    let mut machine = current?;
                    // Re-check against the committed record; a concurrent
                    // tick or release may have advanced it already.
                    if machine.state != MachineState::InUse || !machine.cycle_elapsed(now) {
                        return None;
                    }
                    machine.state = MachineState::Finished;
                    machine.completed_at = machine.completed_at.or(Some(now));
                    machine.completion_notified_at = Some(now);
                    Some(machine)
                })
                .await?;

            if let TxOutcome::Committed { current, .. } = outcome {
                completed += 1;
                if let Some(owner) = &current.owner_identity {
                    let message = format!("{} has finished its cycle", current.label);
                    if let Err(e) = self
                        .dispatcher
                        .send(
                            NotificationKind::Completion,
                            owner,
                            &message,
                            Some(machine_id.as_str()),
                            None,
                        )
                        .await
                    {
                        tracing::warn!(
                            machine = %machine_id,
                            error = %e,
                            "failed to deliver completion notification"
                        );
                    }
                }
            }
        }
        Ok(completed)
    }

    /// Ask the owner of an elapsed machine to come pick up their laundry
    ///
    /// Returns `Ok(false)` with no side effect when the machine has no
    /// owner, the caller is the owner, the cycle has not elapsed, or a
    /// reminder was already sent within the throttle window. On success the
    /// caller joins the machine's reminder subscribers and the owner gets a
    /// reminder notification.
    pub async fn send_reminder(
        &self,
        room_id: &str,
        machine_id: &str,
        from: &Identity,
    ) -> WasherResult<bool> {
        let machine = self.require_machine(room_id, machine_id).await?;
        let now = Utc::now();

        let owner = match machine.owner_identity.clone() {
            Some(owner) => owner,
            None => return Ok(false),
        };
        if &owner == from {
            return Ok(false);
        }
        // Valid once finished, or once the timer has elapsed even if no tick
        // has flipped the state yet.
        if machine.state != MachineState::Finished && !machine.cycle_elapsed(now) {
            return Ok(false);
        }
        if let Some(last) = machine.last_reminder_sent {
            if now - last < self.config.reminder_throttle {
                return Ok(false);
            }
        }

        let mut updated = machine;
        updated.reminder_subscribers.insert(from.clone());
        updated.reminder_count += 1;
        updated.last_reminder_sent = Some(now);
        // Plain write: the finished machine's reminder fields have a single
        // writer at this moment. A failed write surfaces as a failed action.
        self.store.write_machine(room_id, &updated).await?;

        let message = format!("Please empty {}", updated.label);
        self.dispatcher
            .send(
                NotificationKind::Reminder,
                &owner,
                &message,
                Some(machine_id),
                Some(from),
            )
            .await?;
        Ok(true)
    }

    /// Administrative uniform shift of every in-use machine's finish time
    ///
    /// `delta` may be negative (skip forward) or positive; invariants hold
    /// in both directions, the next tick simply re-evaluates the timers.
    pub async fn shift_finish_times(
        &self,
        room_id: &str,
        delta: Duration,
    ) -> WasherResult<usize> {
        let machines = match self.store.read_machines(room_id).await? {
            Some(machines) => machines,
            None => return Ok(0),
        };

        let mut shifted = 0;
        for (_, mut machine) in machines {
            if machine.state != MachineState::InUse {
                continue;
            }
            let finish = match machine.expected_finish() {
                Some(finish) => finish,
                None => continue,
            };
            machine.expected_finish_time = Some(finish + delta);
            self.store.write_machine(room_id, &machine).await?;
            shifted += 1;
        }
        Ok(shifted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::MachineMap;

    fn fixtures() -> (Arc<dyn Store>, Arc<NotificationDispatcher>, MachineEngine) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(store.clone(), None));
        let engine = MachineEngine::new(store.clone(), dispatcher.clone(), EngineConfig::default());
        (store, dispatcher, engine)
    }

    async fn seed_room(store: &Arc<dyn Store>, room_id: &str) {
        let mut machines = MachineMap::new();
        for (id, label) in [("w1", "W1"), ("w2", "W2"), ("d1", "D1")] {
            machines.insert(id.to_string(), Machine::blank(id, label));
        }
        store.write_machine_set(room_id, &machines).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_claims_available_machine() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        let started = engine
            .start_machine("laundry-a", "w1", &alice, Some("Alice"), 45.0)
            .await
            .unwrap();
        assert!(started);

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.state, MachineState::InUse);
        assert_eq!(machine.owner_identity, Some(alice));
        assert_eq!(machine.owner_display_name.as_deref(), Some("Alice"));
        assert_eq!(machine.duration_min, Some(45.0));
        assert!(machine.expected_finish_time.is_some());
    }

    #[tokio::test]
    async fn test_start_rejected_when_held_by_other_identity() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");
        let bob = Identity::new("bob@example.com");

        assert!(engine
            .start_machine("laundry-a", "w1", &alice, None, 35.0)
            .await
            .unwrap());
        assert!(!engine
            .start_machine("laundry-a", "w1", &bob, None, 35.0)
            .await
            .unwrap());

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.owner_identity, Some(alice));
    }

    #[tokio::test]
    async fn test_same_owner_restart_refreshes_cycle() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        assert!(engine
            .start_machine("laundry-a", "w1", &alice, None, 35.0)
            .await
            .unwrap());
        assert!(engine
            .start_machine("laundry-a", "w1", &alice, None, 60.0)
            .await
            .unwrap());

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.duration_min, Some(60.0));
    }

    #[tokio::test]
    async fn test_start_rejects_non_positive_duration() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        let result = engine
            .start_machine("laundry-a", "w1", &alice, None, 0.0)
            .await;
        assert!(matches!(result, Err(WasherError::CycleDurationInvalid(_))));
    }

    #[tokio::test]
    async fn test_start_unknown_machine_is_an_error() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        let result = engine
            .start_machine("laundry-a", "w9", &alice, None, 35.0)
            .await;
        assert!(matches!(result, Err(WasherError::MachineNotFound(_))));
    }

    #[tokio::test]
    async fn test_finish_by_non_owner_aborts() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");
        let bob = Identity::new("bob@example.com");

        engine
            .start_machine("laundry-a", "w1", &alice, None, 35.0)
            .await
            .unwrap();
        assert!(!engine
            .finish_machine("laundry-a", "w1", &bob)
            .await
            .unwrap());

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.state, MachineState::InUse);
        assert_eq!(machine.owner_identity, Some(alice));
    }

    #[tokio::test]
    async fn test_finish_by_owner_resets_machine() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        engine
            .start_machine("laundry-a", "w1", &alice, None, 35.0)
            .await
            .unwrap();
        assert!(engine
            .finish_machine("laundry-a", "w1", &alice)
            .await
            .unwrap());

        let machine = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine, Machine::blank("w1", "W1"));
    }

    #[tokio::test]
    async fn test_reminder_from_owner_always_fails() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        // Microscopic cycle so the timer is already elapsed.
        engine
            .start_machine("laundry-a", "w1", &alice, None, 0.000001)
            .await
            .unwrap();
        assert!(!engine
            .send_reminder("laundry-a", "w1", &alice)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reminder_before_cycle_elapsed_fails() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");
        let bob = Identity::new("bob@example.com");

        engine
            .start_machine("laundry-a", "w1", &alice, None, 60.0)
            .await
            .unwrap();
        assert!(!engine
            .send_reminder("laundry-a", "w1", &bob)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reminder_on_unowned_machine_fails() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let bob = Identity::new("bob@example.com");

        assert!(!engine
            .send_reminder("laundry-a", "w1", &bob)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_shift_finish_times_moves_in_use_machines_only() {
        let (store, _, engine) = fixtures();
        seed_room(&store, "laundry-a").await;
        let alice = Identity::new("alice@example.com");

        engine
            .start_machine("laundry-a", "w1", &alice, None, 60.0)
            .await
            .unwrap();
        let before = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap()
            .expected_finish_time
            .unwrap();

        let shifted = engine
            .shift_finish_times("laundry-a", Duration::minutes(-30))
            .await
            .unwrap();
        assert_eq!(shifted, 1);

        let after = store
            .read_machine("laundry-a", "w1")
            .await
            .unwrap()
            .unwrap()
            .expected_finish_time
            .unwrap();
        assert_eq!(after, before - Duration::minutes(30));
    }
}
