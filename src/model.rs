//! Core records for the machine reservation domain
//!
//! Every wire-facing struct serializes with camelCase field names so the JSON
//! stored under the room keyspace matches what other clients of the shared
//! store read and write. Missing fields deserialize to blank-state defaults
//! rather than failing, so a partially written record never produces a read
//! error.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Opaque identity of a claimant or notification recipient
///
/// A single identity type replaces the email-keyed and uid-keyed ownership
/// variants; callers decide what the string carries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path-safe encoding used for the per-recipient notification keyspace
    ///
    /// Real-time keyed stores forbid `. # $ [ ] /` in key segments; each is
    /// replaced with `,` so `alice@example.com` maps to a stable key.
    pub fn recipient_key(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                '.' | '#' | '$' | '[' | ']' | '/' => ',',
                other => other,
            })
            .collect()
    }

    /// Display fallback when no explicit display name was supplied
    ///
    /// For email-shaped identities this is the local part; otherwise the
    /// identity itself.
    pub fn default_display_name(&self) -> String {
        match self.0.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_string(),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Lifecycle state of a machine
///
/// Machines cycle indefinitely through `available → in-use → finished →
/// available`; the state governs which engine actions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineState {
    #[default]
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "in-use")]
    InUse,
    #[serde(rename = "finished")]
    Finished,
}

/// Machine type, encoded by convention in the label prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineKind {
    Washer,
    Dryer,
}

/// One physical washer/dryer
///
/// The record is the unit of contention in the store: claim and release go
/// through the transactional update path, everything else is a plain write by
/// a party that exclusively owns the touched fields at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Stable identifier, assigned at provisioning
    pub id: String,

    /// Display name, e.g. "W1" or "D2"
    pub label: String,

    #[serde(default)]
    pub state: MachineState,

    /// Claimant identity; `None` exactly when the machine is available
    #[serde(default)]
    pub owner_identity: Option<Identity>,

    /// Human-readable owner label; derived from the identity if absent
    #[serde(default)]
    pub owner_display_name: Option<String>,

    /// When the current cycle began
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Requested cycle length in minutes
    #[serde(default)]
    pub duration_min: Option<f64>,

    /// Cached `start_time + duration_min`; may be overridden administratively
    #[serde(default)]
    pub expected_finish_time: Option<DateTime<Utc>>,

    /// When the engine detected the cycle had elapsed; set once per cycle
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Guard against duplicate completion notifications
    #[serde(default)]
    pub completion_notified_at: Option<DateTime<Utc>>,

    /// Most recent reminder aimed at the owner, for throttling
    #[serde(default)]
    pub last_reminder_sent: Option<DateTime<Utc>>,

    /// Reminders sent during the current cycle
    #[serde(default)]
    pub reminder_count: u32,

    /// Identities to notify when the machine becomes free; never contains
    /// the current owner
    #[serde(default)]
    pub reminder_subscribers: BTreeSet<Identity>,
}

/// Convert a caller-supplied cycle length in minutes to a duration
///
/// Fractional minutes are allowed (the UI offers 0.1 for demos), so the
/// conversion goes through milliseconds.
pub fn minutes_to_duration(minutes: f64) -> Duration {
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

impl Machine {
    /// Blank (available) machine shape, used for seeding and for reset
    pub fn blank(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            state: MachineState::Available,
            owner_identity: None,
            owner_display_name: None,
            start_time: None,
            duration_min: None,
            expected_finish_time: None,
            completed_at: None,
            completion_notified_at: None,
            last_reminder_sent: None,
            reminder_count: 0,
            reminder_subscribers: BTreeSet::new(),
        }
    }

    /// Machine type from the label prefix; unknown prefixes read as washers
    pub fn kind(&self) -> MachineKind {
        match self.label.chars().next() {
            Some('D') | Some('d') => MachineKind::Dryer,
            _ => MachineKind::Washer,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == MachineState::Available
    }

    /// Owner label for display, falling back to a name derived from the
    /// identity
    pub fn owner_display(&self) -> Option<String> {
        match (&self.owner_display_name, &self.owner_identity) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(identity)) => Some(identity.default_display_name()),
            (None, None) => None,
        }
    }

    /// Effective expected finish time
    ///
    /// The cached/overridden value wins; otherwise it is derived from
    /// `start_time + duration_min`.
    pub fn expected_finish(&self) -> Option<DateTime<Utc>> {
        if self.expected_finish_time.is_some() {
            return self.expected_finish_time;
        }
        match (self.start_time, self.duration_min) {
            (Some(start), Some(minutes)) => Some(start + minutes_to_duration(minutes)),
            _ => None,
        }
    }

    /// Fill in the derivable cache field after a read
    ///
    /// A record written by an older client may carry `start_time` and
    /// `duration_min` without the cached finish time; normalization derives
    /// it instead of treating the record as missing data.
    pub fn normalize(&mut self) {
        if self.expected_finish_time.is_none() {
            self.expected_finish_time = self.expected_finish();
        }
    }

    /// Whether the current cycle's timer has elapsed at `now`
    ///
    /// False when the machine carries no timing data at all.
    pub fn cycle_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.expected_finish() {
            Some(finish) => finish <= now,
            None => false,
        }
    }

    /// Reset every owner/timing/reminder field to the blank-state default,
    /// keeping id and label
    pub fn reset(&mut self) {
        *self = Machine::blank(self.id.clone(), self.label.clone());
    }
}

/// Kind of a notification record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Completion,
    Reminder,
    Pickup,
}

/// Ephemeral message keyed by recipient identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_identity: Identity,
    #[serde(default)]
    pub sender_identity: Option<Identity>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub seen: bool,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        recipient: Identity,
        message: impl Into<String>,
        machine_id: Option<String>,
        sender: Option<Identity>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_identity: recipient,
            sender_identity: sender,
            message: message.into(),
            timestamp: Utc::now(),
            machine_id,
            kind,
            seen: false,
        }
    }
}

/// A namespace partitioning an independent machine set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
}
