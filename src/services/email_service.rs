//! Outbound email queue.
//!
//! Business operations only ever enqueue rows (inside their own transaction).
//! A background dispatcher hands pending rows to an HTTP mail relay, signing
//! each body with HMAC-SHA256 so the relay can verify where it came from.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::audit::{EmailQueueItem, RelayMessage},
};

type HmacSha256 = Hmac<Sha256>;

/// Rows claimed per dispatcher pass.
const BATCH_SIZE: i64 = 25;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn enqueue<'e, E>(
    executor: E,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<Uuid, AppError>
where
    E: PgExecutor<'e>,
{
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO email_queue (recipient, subject, body)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

pub async fn list(pool: &DbPool, status: Option<&str>) -> Result<Vec<EmailQueueItem>, AppError> {
    let items = sqlx::query_as::<_, EmailQueueItem>(
        r#"
        SELECT * FROM email_queue
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(status)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// Put a failed message back in the queue with a fresh attempt budget.
pub async fn retry(pool: &DbPool, id: Uuid) -> Result<EmailQueueItem, AppError> {
    sqlx::query_as::<_, EmailQueueItem>(
        r#"
        UPDATE email_queue
        SET status = 'pending', attempts = 0, last_error = NULL, claimed_until = NULL
        WHERE id = $1 AND status = 'failed'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Failed email"))
}

/// Relay settings; the dispatcher is idle when no relay is configured.
#[derive(Debug, Clone)]
pub struct Relay {
    pub url: String,
    pub secret: Option<String>,
    pub max_attempts: i32,
}

impl Relay {
    pub fn from_config(config: &Config) -> Option<Self> {
        config.email_relay_url.as_ref().map(|url| Self {
            url: url.clone(),
            secret: config.email_relay_secret.clone(),
            max_attempts: config.email_max_attempts,
        })
    }
}

/// Deliver one batch of pending messages. Returns how many were sent.
///
/// Rows are claimed with `FOR UPDATE SKIP LOCKED` in a single statement
/// that stamps a lease and commits on its own, so no lock is held while
/// the relay is called. Each outcome is written back separately.
pub async fn dispatch_pending(
    pool: &DbPool,
    client: &reqwest::Client,
    relay: &Relay,
) -> Result<usize, AppError> {
    let batch = claim_batch(pool).await?;

    let mut sent = 0;
    for item in &batch {
        let attempts = item.attempts + 1;
        match deliver(client, relay, item).await {
            Ok(()) => {
                sqlx::query(
                    r#"
                    UPDATE email_queue
                    SET status = 'sent', attempts = $2, sent_at = NOW(),
                        last_error = NULL, claimed_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(item.id)
                .bind(attempts)
                .execute(pool)
                .await?;
                sent += 1;
            }
            Err(error) => {
                let status = status_after_failure(attempts, relay.max_attempts);
                tracing::warn!(email_id = %item.id, attempts, %error, "email delivery failed");

                sqlx::query(
                    r#"
                    UPDATE email_queue
                    SET status = $2, attempts = $3, last_error = $4, claimed_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(item.id)
                .bind(status)
                .bind(attempts)
                .bind(&error)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(sent)
}

/// How long a claim shields a row from other dispatchers. Covers a full
/// batch at the relay client's timeout.
const CLAIM_LEASE_SECS: i64 = 300;

async fn claim_batch(pool: &DbPool) -> Result<Vec<EmailQueueItem>, AppError> {
    let batch = sqlx::query_as::<_, EmailQueueItem>(
        r#"
        UPDATE email_queue
        SET claimed_until = NOW() + $2::float8 * INTERVAL '1 second'
        WHERE id IN (
            SELECT id FROM email_queue
            WHERE status = 'pending'
              AND (claimed_until IS NULL OR claimed_until < NOW())
            ORDER BY created_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(BATCH_SIZE)
    .bind(CLAIM_LEASE_SECS)
    .fetch_all(pool)
    .await?;

    Ok(batch)
}

/// Queue status after a failed attempt.
fn status_after_failure(attempts: i32, max_attempts: i32) -> &'static str {
    if attempts >= max_attempts {
        "failed"
    } else {
        "pending"
    }
}

/// POST one message to the relay.
///
/// # Headers Sent
///
/// - `Content-Type: application/json`
/// - `X-Relay-Signature: sha256=<hex>` (when a secret is configured)
/// - `X-Relay-Message-Id: <uuid>`
async fn deliver(
    client: &reqwest::Client,
    relay: &Relay,
    item: &EmailQueueItem,
) -> Result<(), String> {
    let payload = serde_json::to_string(&RelayMessage::from(item))
        .map_err(|e| format!("Failed to serialize message: {e}"))?;

    let mut request = client
        .post(&relay.url)
        .header("Content-Type", "application/json")
        .header("X-Relay-Message-Id", item.id.to_string());

    if let Some(secret) = &relay.secret {
        request = request.header("X-Relay-Signature", generate_signature(secret, &payload)?);
    }

    let response = request
        .body(payload)
        .send()
        .await
        .map_err(|e| format!("Request failed: {e}"))?;

    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(format!("Relay responded {status}: {body}"))
    }
}

/// `sha256=<hex_encoded_hmac>` over the exact request body.
fn generate_signature(secret: &str, payload: &str) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("Invalid relay secret: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Poll the queue forever at `poll_interval`.
pub fn spawn_dispatcher(pool: DbPool, relay: Relay, poll_interval: Duration) {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "email dispatcher could not build HTTP client");
                return;
            }
        };

        tracing::info!(relay = %relay.url, "email dispatcher started");
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            match dispatch_pending(&pool, &client, &relay).await {
                Ok(0) => {}
                Ok(sent) => tracing::info!(sent, "emails delivered"),
                Err(e) => tracing::error!(error = %e, "email dispatch pass failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_hmac() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature =
            generate_signature("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            signature,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn failures_exhaust_the_attempt_budget() {
        assert_eq!(status_after_failure(1, 5), "pending");
        assert_eq!(status_after_failure(4, 5), "pending");
        assert_eq!(status_after_failure(5, 5), "failed");
        assert_eq!(status_after_failure(1, 1), "failed");
    }

    #[test]
    fn claim_lease_outlasts_a_full_batch() {
        let worst_case = BATCH_SIZE * RELAY_TIMEOUT.as_secs() as i64;
        assert!(CLAIM_LEASE_SECS >= worst_case);
    }

    #[test]
    fn relay_is_disabled_without_url() {
        let config = crate::config::tests::test_config();
        assert!(Relay::from_config(&config).is_none());

        let mut with_relay = config;
        with_relay.email_relay_url = Some("https://mail.example.com/send".to_string());
        let relay = Relay::from_config(&with_relay).unwrap();
        assert_eq!(relay.max_attempts, 5);
        assert!(relay.secret.is_none());
    }
}
