//! Outbound commands.
//!
//! Every command runs through a small state machine:
//!
//! ```text
//! Idle -> AwaitingConnection -> Invoking -> done
//!                 |                 |
//!                 v                 v  (link lost, budget left)
//!               Failed <-------- RetryingOnce -> AwaitingConnection -> Invoking
//! ```
//!
//! `RetryingOnce` is only reachable from a first attempt, so a command is
//! retried at most once. Only connectivity failures are retried; an error
//! returned by the hub is passed through as is. A retry that finds the
//! binding recovering on its own waits for it, bounded by the connect
//! timeout, before deciding whether to reconnect.

use crate::connection::ChatConnection;
use crate::error::{ChatError, TransportError};
use gearshare_core::{ChatId, ConnectionState, HubCommand, MessageId};
use serde_json::Value;

/// How a command reacts to losing the link mid-invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryBudget {
    None,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

#[derive(Debug)]
enum CommandPhase {
    Idle,
    AwaitingConnection(Attempt),
    Invoking(Attempt),
    RetryingOnce,
    Failed(ChatError),
}

struct CommandPlan {
    command: HubCommand,
    budget: RetryBudget,
    /// Room to re-enter after reconnecting.
    rejoin: Option<ChatId>,
    /// Treat "already a member" / "not a member" replies as success.
    membership: bool,
}

impl ChatConnection {
    /// Send `content` to a chat, retrying once across a reconnect.
    ///
    /// A retried send may reach the hub twice if the first attempt was
    /// delivered but its acknowledgement was lost.
    pub async fn send_message(
        &self,
        chat_id: impl Into<ChatId>,
        content: impl Into<String>,
    ) -> Result<(), ChatError> {
        let chat_id = chat_id.into();
        self.run(CommandPlan {
            command: HubCommand::SendMessage {
                chat_id,
                content: content.into(),
            },
            budget: RetryBudget::Once,
            rejoin: Some(chat_id),
            membership: false,
        })
        .await
        .map(drop)
    }

    pub async fn join_chat(&self, chat_id: impl Into<ChatId>) -> Result<(), ChatError> {
        self.run(CommandPlan {
            command: HubCommand::JoinChat(chat_id.into()),
            budget: RetryBudget::None,
            rejoin: None,
            membership: true,
        })
        .await
        .map(drop)
    }

    pub async fn leave_chat(&self, chat_id: impl Into<ChatId>) -> Result<(), ChatError> {
        self.run(CommandPlan {
            command: HubCommand::LeaveChat(chat_id.into()),
            budget: RetryBudget::None,
            rejoin: None,
            membership: true,
        })
        .await
        .map(drop)
    }

    /// Mark a message read. Accepts numeric or string ids; not retried.
    pub async fn mark_as_read(&self, message_id: impl Into<MessageId>) -> Result<(), ChatError> {
        self.run(CommandPlan {
            command: HubCommand::MarkAsRead(message_id.into()),
            budget: RetryBudget::None,
            rejoin: None,
            membership: false,
        })
        .await
        .map(drop)
    }

    async fn run(&self, plan: CommandPlan) -> Result<Value, ChatError> {
        self.ensure_initialized().await?;

        let mut phase = CommandPhase::Idle;
        loop {
            phase = match phase {
                CommandPhase::Idle => CommandPhase::AwaitingConnection(Attempt::First),

                CommandPhase::AwaitingConnection(attempt) => {
                    match self.await_connection(&plan, attempt).await {
                        Ok(()) => CommandPhase::Invoking(attempt),
                        Err(e) => CommandPhase::Failed(e),
                    }
                }

                CommandPhase::Invoking(attempt) => match self.invoke(&plan.command).await {
                    Ok(value) => return Ok(value),
                    Err(e) if plan.membership && is_membership_noop(&e) => {
                        tracing::debug!("{} was a no-op: {}", plan.command, e);
                        return Ok(Value::Null);
                    }
                    Err(e) if !e.is_connectivity() => CommandPhase::Failed(ChatError::InvokeFailed {
                        method: plan.command.method(),
                        source: e,
                    }),
                    Err(e) => {
                        let state = self.connection_state().await;
                        tracing::warn!("{} failed while {}: {}", plan.command, state, e);
                        if state.is_connected() {
                            CommandPhase::Failed(ChatError::InvokeFailed {
                                method: plan.command.method(),
                                source: e,
                            })
                        } else if attempt == Attempt::First && plan.budget == RetryBudget::Once {
                            CommandPhase::RetryingOnce
                        } else {
                            CommandPhase::Failed(not_connected(&plan.command))
                        }
                    }
                },

                CommandPhase::RetryingOnce => {
                    tracing::info!("Retrying {} after reconnect", plan.command);
                    CommandPhase::AwaitingConnection(Attempt::Retry)
                }

                CommandPhase::Failed(e) => return Err(e),
            };
        }
    }

    /// Make sure the link is up, reconnecting at most once, and re-enter the
    /// plan's room if the link was re-established.
    async fn await_connection(&self, plan: &CommandPlan, attempt: Attempt) -> Result<(), ChatError> {
        let mut before = self.connection_state().await;
        if before == ConnectionState::Reconnecting && attempt == Attempt::Retry {
            tracing::debug!(
                "Waiting up to {:?} for the hub to recover before retrying {}",
                self.recovery_wait,
                plan.command
            );
            let settled = self.poll_state(|state| state != ConnectionState::Reconnecting);
            if let Ok(state) = tokio::time::timeout(self.recovery_wait, settled).await {
                before = state;
            }
        }
        if matches!(before, ConnectionState::Disconnected | ConnectionState::Connecting) {
            match self.start_connection().await {
                Ok(()) => {}
                Err(ChatError::AuthTokenMissing) => return Err(ChatError::AuthTokenMissing),
                Err(e) => tracing::warn!("Reconnect for {} failed: {}", plan.command, e),
            }
        }

        if !self.connection_state().await.is_connected() {
            return Err(not_connected(&plan.command));
        }

        let reconnected = before == ConnectionState::Disconnected || attempt == Attempt::Retry;
        if let Some(chat_id) = plan.rejoin.filter(|_| reconnected) {
            let join = HubCommand::JoinChat(chat_id);
            match self.invoke(&join).await {
                Ok(_) => {}
                Err(e) if is_membership_noop(&e) => {}
                Err(e) if e.is_connectivity() => return Err(not_connected(&plan.command)),
                Err(e) => {
                    return Err(ChatError::InvokeFailed {
                        method: join.method(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    async fn invoke(&self, command: &HubCommand) -> Result<Value, TransportError> {
        let binding = self
            .current_binding()
            .await
            .ok_or(TransportError::NotConnected(ConnectionState::Disconnected))?;
        tracing::debug!("Invoking {}", command);
        binding.invoke(command.method(), command.arguments()).await
    }
}

fn not_connected(command: &HubCommand) -> ChatError {
    ChatError::NotConnected {
        command: command.to_string(),
    }
}

/// Hub replies meaning the membership change was already in effect.
fn is_membership_noop(err: &TransportError) -> bool {
    match err {
        TransportError::Remote(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("already") || message.contains("not a member")
        }
        _ => false,
    }
}
