//! Audit log and outbound email queue records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of a state-changing action.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    /// `None` for actions taken by the scheduler
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Queued outbound email.
///
/// # Lifecycle
///
/// `pending` until the dispatcher delivers it (`sent`) or it exhausts its
/// attempts (`failed`).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmailQueueItem {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Set while a dispatcher is delivering the row
    pub claimed_until: Option<DateTime<Utc>>,
}

/// Body POSTed to the mail relay.
///
/// The relay verifies the `X-Relay-Signature: sha256=<hex>` header, an
/// HMAC-SHA256 of the JSON body keyed with the shared secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayMessage {
    pub message_id: Uuid,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl From<&EmailQueueItem> for RelayMessage {
    fn from(item: &EmailQueueItem) -> Self {
        Self {
            message_id: item.id,
            to: item.recipient.clone(),
            subject: item.subject.clone(),
            text: item.body.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailQueueQuery {
    pub status: Option<String>,
}
