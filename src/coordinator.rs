use crate::commands::{AdminCommand, CommandOutcome};
use crate::deferred::DeferredTask;
use crate::detector::{self, Violation};
use crate::enforcement::{Decision, EnforcementPolicy};
use crate::messaging::{within, ChatId, InboundEvent, IncomingMessage, MessagingClient, UserId};
use crate::stemmer::Stemmer;
use crate::store::{lock_policy, SharedPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to a single inbound event.
#[derive(Debug)]
pub enum Handled {
    Ignored,
    Command(CommandOutcome),
    Clean,
    Skipped {
        violation: Violation,
        prior_messages: u64,
    },
    Enforced {
        violation: Violation,
        notice_removal: Option<DeferredTask>,
    },
}

pub struct ModerationCoordinator {
    chat: ChatId,
    client: Arc<dyn MessagingClient>,
    policy: SharedPolicy,
    stemmer: Arc<dyn Stemmer>,
    enforcement: EnforcementPolicy,
    call_timeout: Duration,
    admins: OnceCell<HashSet<UserId>>,
}

impl ModerationCoordinator {
    pub fn new(
        chat: ChatId,
        client: Arc<dyn MessagingClient>,
        policy: SharedPolicy,
        stemmer: Arc<dyn Stemmer>,
    ) -> Self {
        Self {
            chat,
            client,
            policy,
            stemmer,
            enforcement: EnforcementPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            admins: OnceCell::new(),
        }
    }

    pub fn with_enforcement(mut self, enforcement: EnforcementPolicy) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Handle events one at a time until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        log::info!("Moderating chat {}", self.chat);
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        log::info!("Event stream closed");
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Handled {
        match event {
            InboundEvent::NewMessage(message) => self.handle_message(message).await,
            InboundEvent::StatusChange { user } => {
                log::debug!("Status change for user {user}");
                Handled::Ignored
            }
            InboundEvent::Other(kind) => {
                log::debug!("Ignoring {kind}");
                Handled::Ignored
            }
        }
    }

    async fn handle_message(&self, message: IncomingMessage) -> Handled {
        if message.chat != self.chat {
            log::debug!("Ignoring message {} from chat {}", message.id, message.chat);
            return Handled::Ignored;
        }

        if self.is_admin(message.sender).await {
            if let Some(command) = AdminCommand::parse(&message.text) {
                return self.run_command(command, &message).await;
            }
        }

        let violation = {
            let mut state = lock_policy(&self.policy);
            detector::detect(&message.text, &mut state, self.stemmer.as_ref())
        };
        let Some(violation) = violation else {
            return Handled::Clean;
        };
        log::debug!("Message {} violates policy: {violation}", message.id);

        let prior_messages = match within(
            self.call_timeout,
            self.client.count_recent_messages(message.chat, message.sender),
        )
        .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                log::warn!("Message volume for user {} unknown: {e}", message.sender);
                None
            }
        };

        let decision = {
            let mut state = lock_policy(&self.policy);
            self.enforcement
                .decide(&violation, message.sender, prior_messages, &mut state)
        };

        match decision {
            Decision::Skip { prior_messages } => Handled::Skipped {
                violation,
                prior_messages,
            },
            Decision::Enforce { notice } => {
                let notice_removal = self
                    .enforcement
                    .carry_out(Arc::clone(&self.client), &message, &notice, self.call_timeout)
                    .await;
                Handled::Enforced {
                    violation,
                    notice_removal,
                }
            }
        }
    }

    async fn run_command(&self, command: AdminCommand, message: &IncomingMessage) -> Handled {
        log::info!("Admin {} issued {command:?}", message.sender);
        let outcome = {
            let mut state = lock_policy(&self.policy);
            command.execute(&mut state, self.stemmer.as_ref())
        };

        let feedback = outcome.to_string();
        if let Err(e) = within(
            self.call_timeout,
            self.client.send_message(message.chat, &feedback, true),
        )
        .await
        {
            log::error!("Failed to send command feedback: {e}");
        }

        Handled::Command(outcome)
    }

    /// The admin list is fetched once; a failed fetch is retried on the next
    /// message and meanwhile nobody counts as admin.
    async fn is_admin(&self, user: UserId) -> bool {
        let admins = self
            .admins
            .get_or_try_init(|| async {
                let admins = within(self.call_timeout, self.client.list_admins(self.chat)).await?;
                log::info!("Loaded {} chat admins", admins.len());
                Ok::<_, crate::messaging::MessagingError>(admins)
            })
            .await;

        match admins {
            Ok(admins) => admins.contains(&user),
            Err(e) => {
                log::warn!("Could not fetch chat admins: {e}");
                false
            }
        }
    }
}
