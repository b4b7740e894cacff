//! Notification construction, persistence, and outbound forwarding
//!
//! The dispatcher persists every notification to the recipient's inbox in
//! the store first; forwarding to the external delivery channel is
//! best-effort and never fails the primary send.

use crate::config::WebhookConfig;
use crate::error::{WasherError, WasherResult};
use crate::model::{Identity, Notification, NotificationKind};
use crate::store::{InboxWatch, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// JSON body posted to the relay's `/notify` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPayload {
    pub recipient_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_hint: Option<String>,
}

impl NotifyPayload {
    fn from_notification(notification: &Notification) -> Self {
        Self {
            recipient_email: notification.recipient_identity.as_str().to_string(),
            sender_email: notification
                .sender_identity
                .as_ref()
                .map(|s| s.as_str().to_string()),
            message: notification.message.clone(),
            timestamp: notification.timestamp,
            machine_id: notification.machine_id.clone(),
            kind: Some(notification.kind),
            subject_hint: Some(subject_hint(notification.kind)),
        }
    }
}

fn subject_hint(kind: NotificationKind) -> String {
    match kind {
        NotificationKind::Completion => "Your laundry is done".to_string(),
        NotificationKind::Reminder => "Please empty the machine".to_string(),
        NotificationKind::Pickup => "A machine is free".to_string(),
    }
}

/// Expected relay response body
#[derive(Debug, Deserialize)]
struct RelayResponse {
    status: String,
}

/// HTTP client for the outbound webhook relay
pub struct RelayClient {
    http: reqwest::Client,
    url: Url,
    bearer_token: Option<String>,
}

impl RelayClient {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
        }
    }

    /// Forward one notification payload to the relay
    ///
    /// Success requires HTTP 200 and a `{"status":"sent"}` body.
    pub async fn forward(&self, payload: &NotifyPayload) -> WasherResult<()> {
        let endpoint = self
            .url
            .join("notify")
            .map_err(|e| WasherError::ConfigError(format!("Invalid relay URL: {}", e)))?;

        let mut request = self.http.post(endpoint).json(payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WasherError::RelayUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WasherError::RelayRejected(format!("HTTP {}", status)));
        }

        let body: RelayResponse = response.json().await?;
        if body.status != "sent" {
            return Err(WasherError::RelayRejected(body.status));
        }
        Ok(())
    }
}

/// Persists notification records and delivers them to recipient inboxes
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    relay: Option<RelayClient>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, relay: Option<RelayClient>) -> Self {
        Self { store, relay }
    }

    /// Persist a notification, then forward it to the relay if one is
    /// configured
    ///
    /// A forwarding failure is logged and does not roll back the persisted
    /// record.
    pub async fn send(
        &self,
        kind: NotificationKind,
        recipient: &Identity,
        message: &str,
        machine_id: Option<&str>,
        sender: Option<&Identity>,
    ) -> WasherResult<Uuid> {
        let notification = Notification::new(
            kind,
            recipient.clone(),
            message,
            machine_id.map(|m| m.to_string()),
            sender.cloned(),
        );

        self.store.append_notification(&notification).await?;

        if let Some(relay) = &self.relay {
            let payload = NotifyPayload::from_notification(&notification);
            if let Err(e) = relay.forward(&payload).await {
                tracing::warn!(
                    recipient = %recipient,
                    error = %e,
                    "relay forwarding failed; notification remains persisted"
                );
            }
        }

        Ok(notification.id)
    }

    /// Subscribe to a recipient's inbox stream
    pub async fn subscribe(&self, recipient: &Identity) -> WasherResult<InboxWatch> {
        self.store.subscribe_notifications(recipient).await
    }

    /// Read a recipient's inbox, most recent first
    pub async fn inbox(&self, recipient: &Identity) -> WasherResult<Vec<Notification>> {
        let mut list = self.store.read_notifications(recipient).await?;
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(list)
    }

    pub async fn clear_all(&self, recipient: &Identity) -> WasherResult<()> {
        self.store.clear_notifications(recipient).await
    }

    pub async fn clear_by_ids(&self, recipient: &Identity, ids: &[Uuid]) -> WasherResult<()> {
        self.store.remove_notifications(recipient, ids).await
    }

    pub async fn clear_by_machine(
        &self,
        recipient: &Identity,
        machine_id: &str,
    ) -> WasherResult<()> {
        self.store
            .remove_notifications_for_machine(recipient, machine_id)
            .await
    }

    pub async fn mark_seen(&self, recipient: &Identity, id: Uuid) -> WasherResult<()> {
        self.store.mark_notification_seen(recipient, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn dispatcher() -> NotificationDispatcher {
        NotificationDispatcher::new(Arc::new(MemoryStore::new()), None)
    }

    #[tokio::test]
    async fn test_send_persists_to_recipient_inbox() {
        let dispatcher = dispatcher();
        let alice = Identity::new("alice@example.com");

        let id = dispatcher
            .send(
                NotificationKind::Completion,
                &alice,
                "W1 finished",
                Some("w1"),
                None,
            )
            .await
            .unwrap();

        let inbox = dispatcher.inbox(&alice).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, id);
        assert_eq!(inbox[0].kind, NotificationKind::Completion);
        assert_eq!(inbox[0].machine_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_inbox_orders_most_recent_first() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let dispatcher = NotificationDispatcher::new(store.clone(), None);
        let alice = Identity::new("alice@example.com");

        let mut older = Notification::new(
            NotificationKind::Completion,
            alice.clone(),
            "older",
            None,
            None,
        );
        older.timestamp = Utc::now() - Duration::minutes(10);
        let newer = Notification::new(
            NotificationKind::Reminder,
            alice.clone(),
            "newer",
            None,
            None,
        );
        store.append_notification(&older).await.unwrap();
        store.append_notification(&newer).await.unwrap();

        let inbox = dispatcher.inbox(&alice).await.unwrap();
        assert_eq!(inbox[0].message, "newer");
        assert_eq!(inbox[1].message, "older");
    }

    #[tokio::test]
    async fn test_clear_by_ids_leaves_others() {
        let dispatcher = dispatcher();
        let alice = Identity::new("alice@example.com");

        let first = dispatcher
            .send(NotificationKind::Pickup, &alice, "W1 free", Some("w1"), None)
            .await
            .unwrap();
        let _second = dispatcher
            .send(NotificationKind::Pickup, &alice, "D1 free", Some("d1"), None)
            .await
            .unwrap();

        dispatcher.clear_by_ids(&alice, &[first]).await.unwrap();
        let inbox = dispatcher.inbox(&alice).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].machine_id.as_deref(), Some("d1"));
    }

    #[test]
    fn test_payload_field_names_match_relay_contract() {
        let notification = Notification::new(
            NotificationKind::Reminder,
            Identity::new("alice@example.com"),
            "please empty W1",
            Some("w1".to_string()),
            Some(Identity::new("bob@example.com")),
        );
        let payload = NotifyPayload::from_notification(&notification);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["recipientEmail"], "alice@example.com");
        assert_eq!(json["senderEmail"], "bob@example.com");
        assert_eq!(json["machineId"], "w1");
        assert_eq!(json["type"], "reminder");
        assert!(json["subjectHint"].is_string());
    }
}
