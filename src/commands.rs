//! Command surface: authority checks in front of the registry and ban gate.
//!
//! The registry itself is not authority-aware; every permission rule lives
//! here. Replies are plain text.

use crate::bans::BanGate;
use crate::error::{RelayError, RelayResult};
use crate::ledger::MessageLedger;
use crate::notice::{self, Notice};
use crate::platform::Platform;
use crate::registry::LinkRegistry;
use crate::relay;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};

const NOT_IN_GUILD: &str = "You have to be in the guild!";

/// Who ran the command and what they may do in the guild they ran it in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoker {
    #[serde(default)]
    pub guild_id: Option<u64>,
    pub user_id: u64,
    #[serde(default)]
    pub manage_guild: bool,
    #[serde(default)]
    pub ban_members: bool,
}

/// A channel argument together with the guild it belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: u64,
    pub guild_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    CreateLink { channel: ChannelRef },
    Join { code: u32, channel: ChannelRef },
    /// Unlink a channel of the invoking guild.
    Unlink { channel: ChannelRef },
    /// Unlink any channel of a link the invoking guild owns.
    UnlinkAsOwner { channel: ChannelRef },
    InviteCode { link_id: u64 },
    Info { channel_id: u64 },
    Ban { user_id: u64 },
    Unban { user_id: u64 },
    /// DM the invoker where a relayed message came from.
    Lookup { channel_id: u64, message_id: u64 },
    /// Ping the original author of a relayed message.
    Mention { channel_id: u64, message_id: u64 },
    About,
}

pub struct Commands {
    registry: Arc<LinkRegistry>,
    bans: Arc<BanGate>,
    ledger: Arc<MessageLedger>,
    platform: Arc<dyn Platform>,
    invite_ttl: Duration,
}

impl Commands {
    pub fn new(
        registry: Arc<LinkRegistry>,
        bans: Arc<BanGate>,
        ledger: Arc<MessageLedger>,
        platform: Arc<dyn Platform>,
        invite_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            bans,
            ledger,
            platform,
            invite_ttl,
        }
    }

    /// Run `command` and return the reply for the invoker. Validation
    /// failures become their user-facing text; anything else is logged.
    pub async fn execute(&self, invoker: &Invoker, command: Command) -> String {
        match self.try_execute(invoker, command).await {
            Ok(reply) => reply,
            Err(err) if err.is_user_facing() => err.to_string(),
            Err(err) => {
                error!(?err, user_id = invoker.user_id, "command failed");
                "Something went wrong running that command.".to_string()
            }
        }
    }

    #[instrument(skip(self), fields(user_id = invoker.user_id))]
    pub async fn try_execute(&self, invoker: &Invoker, command: Command) -> RelayResult<String> {
        match command {
            Command::CreateLink { channel } => {
                let guild_id = in_guild_of(invoker, &channel)?;
                require(invoker.manage_guild, "You do not have permission to create a link!")?;
                let link = self.registry.create_link(guild_id, channel.id).await?;
                Ok(format!("Created link with id `{}`", link.id))
            }
            Command::Join { code, channel } => {
                in_guild_of(invoker, &channel)?;
                require(invoker.manage_guild, "You do not have permission to create a link!")?;
                self.registry
                    .join_link(code, channel.guild_id, channel.id)
                    .await?;
                Ok("Entanglement complete!".to_string())
            }
            Command::Unlink { channel } => {
                in_guild_of(invoker, &channel)?;
                require(invoker.manage_guild, "You do not have permission to unlink!")?;
                self.registry.leave_link(channel.id).await?;
                Ok("Channel has been untangled!".to_string())
            }
            Command::UnlinkAsOwner { channel } => {
                let guild_id = invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                require(invoker.manage_guild, "You do not have permission to unlink!")?;
                let membership = self
                    .registry
                    .channel_of(channel.id)
                    .await?
                    .ok_or(RelayError::NotLinked)?;
                let link = self
                    .registry
                    .link_info(membership.link_id)
                    .await?
                    .ok_or(RelayError::LinkGone)?;
                require(link.owner_guild == guild_id, "You aren't the owner of the link!")?;
                self.registry.leave_link(channel.id).await?;
                Ok("Channel has been untangled!".to_string())
            }
            Command::InviteCode { link_id } => {
                let guild_id = invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                require(invoker.manage_guild, "You do not have permission to create a link!")?;
                let link = self
                    .registry
                    .link_info(link_id)
                    .await?
                    .ok_or(RelayError::LinkGone)?;
                require(link.owner_guild == guild_id, "This guild does not own the link!")?;
                let code = self.registry.issue_invite(link_id).await?;
                Ok(format!(
                    "Your invite ID is `{}`. This will expire in {} minutes. \
                     Have an admin use `/link <invite_id> <channel>` in the desired link server and channel.",
                    code,
                    self.invite_ttl.as_secs() / 60
                ))
            }
            Command::Info { channel_id } => {
                invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                let summary = self.registry.summary(channel_id).await?;
                let mut reply = format!(
                    "Owner Guild: `{}`\nLink ID: `{}`\nChannels Linked: `{}`\n\nGuilds",
                    summary.link.owner_guild,
                    summary.link.id,
                    summary.members.len()
                );
                for (guild_id, channels) in summary.by_guild() {
                    let listed: Vec<String> = channels
                        .iter()
                        .map(|c| format!("<#{}> (`{}`)", c, c))
                        .collect();
                    let _ = write!(reply, "\n**{}**: {}", guild_id, listed.join(", "));
                }
                Ok(reply)
            }
            Command::Ban { user_id } => {
                let guild_id = invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                require(
                    invoker.ban_members,
                    "You do not have permission to ban a member from the link!",
                )?;
                self.bans.ban(guild_id, user_id).await?;
                Ok(format!(
                    "Successfully banned <@{}> from all links that communicate with this server.",
                    user_id
                ))
            }
            Command::Unban { user_id } => {
                let guild_id = invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                require(
                    invoker.ban_members,
                    "You do not have permission to unban a member from the link!",
                )?;
                self.bans.unban(guild_id, user_id).await?;
                Ok(format!(
                    "Successfully unbanned <@{}> from links that communicate with this server.",
                    user_id
                ))
            }
            Command::Lookup {
                channel_id,
                message_id,
            } => {
                invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                if self.registry.channel_of(channel_id).await?.is_none() {
                    return Err(RelayError::NotLinked);
                }
                let root = self
                    .ledger
                    .resolve_root(message_id)
                    .await?
                    .ok_or(RelayError::ResolveMiss)?;
                let origin = notice::render(&Notice::MessageOrigin {
                    author_id: root.author_id,
                    guild_id: root.guild_id,
                    channel_id: root.channel_id,
                });
                match self.platform.send_direct(invoker.user_id, &origin).await {
                    Ok(()) => Ok("DM sent!".to_string()),
                    Err(err) => {
                        warn!(?err, "lookup DM failed");
                        Ok("DM couldn't be sent! Make sure I can DM you".to_string())
                    }
                }
            }
            Command::Mention {
                channel_id,
                message_id,
            } => {
                invoker.guild_id.ok_or(RelayError::NotAuthorized(NOT_IN_GUILD))?;
                if self.registry.channel_of(channel_id).await?.is_none() {
                    return Err(RelayError::NotLinked);
                }
                let root = self
                    .ledger
                    .resolve_root(message_id)
                    .await?
                    .ok_or(RelayError::ResolveMiss)?;
                match relay::mention_author(self.platform.as_ref(), invoker.user_id, &root, channel_id)
                    .await
                {
                    Ok(()) => Ok("Mentioned".to_string()),
                    Err(err) => {
                        warn!(?err, "mention failed");
                        Ok("Mention couldn't be sent!".to_string())
                    }
                }
            }
            Command::About => {
                let about = notice::render(&Notice::About);
                match self.platform.send_direct(invoker.user_id, &about).await {
                    Ok(()) => Ok("Check your DMs!".to_string()),
                    Err(err) => {
                        warn!(?err, "about DM failed");
                        Ok("I couldn't DM you help information! Make sure I'm not blocked!".to_string())
                    }
                }
            }
        }
    }
}

/// The invoker's guild, which must also own `channel`.
fn in_guild_of(invoker: &Invoker, channel: &ChannelRef) -> RelayResult<u64> {
    match invoker.guild_id {
        Some(guild_id) if guild_id == channel.guild_id => Ok(guild_id),
        _ => Err(RelayError::NotAuthorized(NOT_IN_GUILD)),
    }
}

fn require(allowed: bool, message: &'static str) -> RelayResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(RelayError::NotAuthorized(message))
    }
}
