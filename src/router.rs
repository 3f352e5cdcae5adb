//! Typed platform events and the single router that hands them to the engine.

use crate::bans::BanGate;
use crate::commands::{Command, Commands, Invoker};
use crate::error::{RelayError, RelayResult};
use crate::platform::{OutgoingMessage, Platform};
use crate::registry::LinkRegistry;
use crate::relay::{InboundMessage, ReactionEvent, RelayEngine, TypingEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One platform event, as produced by the gateway process (one JSON object
/// per line, tagged by `type`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageCreate(InboundMessage),
    MessageUpdate {
        channel_id: u64,
        message_id: u64,
        content: String,
    },
    MessageDelete {
        channel_id: u64,
        message_id: u64,
    },
    TypingStart(TypingEvent),
    ReactionAdd(ReactionEvent),
    BanAdd {
        guild_id: u64,
        user_id: u64,
    },
    BanRemove {
        guild_id: u64,
        user_id: u64,
    },
    ChannelDelete {
        channel_id: u64,
    },
    GuildRemove {
        guild_id: u64,
    },
    Command {
        invoker: Invoker,
        /// Where the reply is posted.
        reply_channel: u64,
        command: Command,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MessageCreate(_) => "message_create",
            Event::MessageUpdate { .. } => "message_update",
            Event::MessageDelete { .. } => "message_delete",
            Event::TypingStart(_) => "typing_start",
            Event::ReactionAdd(_) => "reaction_add",
            Event::BanAdd { .. } => "ban_add",
            Event::BanRemove { .. } => "ban_remove",
            Event::ChannelDelete { .. } => "channel_delete",
            Event::GuildRemove { .. } => "guild_remove",
            Event::Command { .. } => "command",
        }
    }
}

pub struct Router {
    relay: Arc<RelayEngine>,
    registry: Arc<LinkRegistry>,
    bans: Arc<BanGate>,
    commands: Arc<Commands>,
    platform: Arc<dyn Platform>,
}

impl Router {
    pub fn new(
        relay: Arc<RelayEngine>,
        registry: Arc<LinkRegistry>,
        bans: Arc<BanGate>,
        commands: Arc<Commands>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            relay,
            registry,
            bans,
            commands,
            platform,
        }
    }

    /// Handle one event. Failures are logged here and never reach the event source.
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();
        if let Err(err) = self.handle(event).await {
            error!(?err, kind, "failed to handle event");
        }
    }

    async fn handle(&self, event: Event) -> RelayResult<()> {
        match event {
            Event::MessageCreate(message) => {
                // Joined here so that draining event handlers drains every fan-out.
                let fan_out = self.relay.on_message(message).await?;
                let targets = fan_out.len();
                let mirrored = fan_out.join().await.len();
                debug!(targets, mirrored, "message relayed");
            }
            Event::MessageUpdate {
                channel_id,
                message_id,
                content,
            } => {
                self.relay.on_edit(channel_id, message_id, &content).await?;
            }
            Event::MessageDelete {
                channel_id,
                message_id,
            } => {
                self.relay.on_delete(channel_id, message_id).await?;
            }
            Event::TypingStart(typing) => self.relay.on_typing(&typing).await?,
            Event::ReactionAdd(reaction) => self.relay.on_reaction(&reaction).await?,
            Event::BanAdd { guild_id, user_id } | Event::BanRemove { guild_id, user_id } => {
                self.bans.invalidate(guild_id, user_id);
            }
            Event::ChannelDelete { channel_id } => match self.registry.leave_link(channel_id).await {
                Ok(_) | Err(RelayError::NotLinked) => {}
                Err(err) => return Err(err),
            },
            Event::GuildRemove { guild_id } => {
                self.registry.remove_guild(guild_id).await?;
            }
            Event::Command {
                invoker,
                reply_channel,
                command,
            } => {
                let reply = OutgoingMessage {
                    content: self.commands.execute(&invoker, command).await,
                    embeds: Vec::new(),
                };
                if let Err(err) = self.platform.send_message(reply_channel, &reply).await {
                    warn!(?err, reply_channel, "failed to send command reply");
                }
            }
        }
        Ok(())
    }
}
