//! Enforcement policy
//!
//! Decides whether a detected violation is acted on and carries out the
//! deletion and the self-removing notice.

use crate::deferred::DeferredTask;
use crate::detector::Violation;
use crate::messaging::{within, IncomingMessage, MessagingClient, SentMessage, UserId};
use crate::store::PolicyState;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_VOLUME_THRESHOLD: u64 = 10;
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The sender has more prior messages than the threshold.
    Skip { prior_messages: u64 },
    Enforce { notice: String },
}

#[derive(Debug, Clone)]
pub struct EnforcementPolicy {
    volume_threshold: u64,
    notice_ttl: Duration,
}

impl EnforcementPolicy {
    pub fn new(volume_threshold: u64, notice_ttl: Duration) -> Self {
        Self {
            volume_threshold,
            notice_ttl,
        }
    }

    pub fn notice_ttl(&self) -> Duration {
        self.notice_ttl
    }

    /// `prior_messages` is `None` when the volume lookup failed; that case
    /// counts as below the threshold.
    pub fn decide(
        &self,
        violation: &Violation,
        sender: UserId,
        prior_messages: Option<u64>,
        state: &mut PolicyState,
    ) -> Decision {
        if let Some(count) = prior_messages.filter(|&count| count > self.volume_threshold) {
            log::info!(
                "Not enforcing {violation} from user {sender}: {count} prior messages exceed {}",
                self.volume_threshold
            );
            return Decision::Skip {
                prior_messages: count,
            };
        }

        state.ban_counter += 1;
        log::info!(
            "Enforcing {violation} from user {sender} (ban #{})",
            state.ban_counter
        );

        Decision::Enforce {
            notice: render_notice(violation, prior_messages),
        }
    }

    /// Delete the offending message, post the notice and schedule the notice
    /// for removal. Failures are logged; nothing is rolled back.
    pub async fn carry_out(
        &self,
        client: Arc<dyn MessagingClient>,
        message: &IncomingMessage,
        notice: &str,
        call_timeout: Duration,
    ) -> Option<DeferredTask> {
        if let Err(e) = within(call_timeout, client.delete_message(message.chat, message.id)).await
        {
            log::error!("Failed to delete message {}: {e}", message.id);
        }

        match within(call_timeout, client.send_message(message.chat, notice, true)).await {
            Ok(sent) => Some(schedule_removal(client, sent, self.notice_ttl, call_timeout)),
            Err(e) => {
                log::error!("Failed to post enforcement notice: {e}");
                None
            }
        }
    }
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_THRESHOLD, DEFAULT_NOTICE_TTL)
    }
}

pub fn render_notice(violation: &Violation, prior_messages: Option<u64>) -> String {
    let count = prior_messages.map_or_else(|| "---".to_string(), |count| count.to_string());
    format!("Сообщение удалено за {violation}. Кол-во сообщений от пользователя {count}")
}

fn schedule_removal(
    client: Arc<dyn MessagingClient>,
    sent: SentMessage,
    delay: Duration,
    call_timeout: Duration,
) -> DeferredTask {
    DeferredTask::schedule(delay, async move {
        match within(call_timeout, client.delete_message(sent.chat, sent.id)).await {
            Ok(()) => log::debug!("Removed notice {}", sent.id),
            Err(e) => log::warn!("Failed to remove notice {}: {e}", sent.id),
        }
    })
}
