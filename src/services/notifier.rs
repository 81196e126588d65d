// src/services/notifier.rs
//
// Outbound chat transport and the recipient registry, both behind trait seams.
// Delivery is best-effort: the caller treats a fan-out as successful when at
// least one recipient accepted the message.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use rand::Rng;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::warn;

use crate::db::store::with_deadline;
use crate::utils::errors::{NotifyError, StoreError};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Recipient set is managed elsewhere (bot commands); we only read it.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    async fn list_recipients(&self) -> Result<Vec<i64>, StoreError>;
}

/* ------------------- Telegram transport ------------------- */

pub struct TelegramNotifier {
    client: reqwest::Client,
    send_message_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            send_message_url: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.send_message_url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/* ------------------- Subscriber registry ------------------- */

#[derive(Clone)]
pub struct PgSubscriberRegistry {
    pool: PgPool,
    call_timeout: Duration,
}

impl PgSubscriberRegistry {
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self { pool, call_timeout }
    }
}

#[async_trait]
impl SubscriberRegistry for PgSubscriberRegistry {
    async fn list_recipients(&self) -> Result<Vec<i64>, StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query_scalar::<_, i64>("SELECT chat_id FROM subscribers")
                .fetch_all(&self.pool)
                .await
        })
        .await
    }
}

/* ------------------- Fan-out ------------------- */

/// Send `text` to every recipient with bounded concurrency. A transient
/// failure gets one jittered retry; a permanent rejection does not. Returns
/// how many recipients accepted the message.
pub async fn broadcast(
    notifier: &dyn Notifier,
    recipients: &[i64],
    text: &str,
    concurrency: usize,
) -> usize {
    let delivered = stream::iter(recipients.iter().copied())
        .map(|chat_id| async move {
            match notifier.send(chat_id, text).await {
                Ok(()) => true,
                Err(e) if e.is_transient() => {
                    let jitter_ms = rand::thread_rng().gen_range(200..=900);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    match notifier.send(chat_id, text).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(chat_id, error = %e, "notification failed after retry");
                            false
                        }
                    }
                }
                Err(e) => {
                    warn!(chat_id, error = %e, "notification rejected");
                    false
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter(|ok| futures_util::future::ready(*ok))
        .count()
        .await;
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails each chat id a configurable number of times before accepting.
    struct FlakyNotifier {
        failures_before_ok: usize,
        attempts: AtomicUsize,
        transient: bool,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, _chat_id: i64, _text: &str) -> Result<(), NotifyError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_ok {
                if self.transient {
                    Err(NotifyError::Rejected {
                        status: 500,
                        body: "upstream".into(),
                    })
                } else {
                    Err(NotifyError::Rejected {
                        status: 403,
                        body: "blocked".into(),
                    })
                }
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_once() {
        let notifier = FlakyNotifier {
            failures_before_ok: 1,
            attempts: AtomicUsize::new(0),
            transient: true,
        };
        let delivered = broadcast(&notifier, &[1], "hola", 4).await;
        assert_eq!(delivered, 1);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_rejections_are_not_retried() {
        let notifier = FlakyNotifier {
            failures_before_ok: usize::MAX,
            attempts: AtomicUsize::new(0),
            transient: false,
        };
        let delivered = broadcast(&notifier, &[1, 2, 3], "hola", 4).await;
        assert_eq!(delivered, 0);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn transient_classification() {
        let rate_limited = NotifyError::Rejected {
            status: 429,
            body: String::new(),
        };
        let forbidden = NotifyError::Rejected {
            status: 403,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(!forbidden.is_transient());
    }
}
