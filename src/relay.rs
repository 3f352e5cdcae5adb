//! Relay engine: turns inbound platform events into fan-out, edits and deletes.
//!
//! Every collaborator is injected at construction. The engine never formats
//! user-facing text itself; notices go through [`crate::notice`].

use crate::bans::BanGate;
use crate::config;
use crate::dispatch::DispatchGateway;
use crate::error::RelayResult;
use crate::ledger::MessageLedger;
use crate::model::{jump_url, ChannelMembership, MessageRef, OriginalMessage, SyncedMessage};
use crate::notice::{self, Notice};
use crate::platform::{Author, BasicMessage, Embed, EmbedAuthor, FetchedMessage, Platform};
use crate::registry::LinkRegistry;
use crate::thread::{self, ArchivedMessage};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const QUESTION: &str = "\u{2753}";
const BELL: &str = "\u{1f514}";

/// A message created in some channel, as observed on the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: u64,
    #[serde(default)]
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    /// Set when a proxy identity authored the message.
    #[serde(default)]
    pub webhook_id: Option<u64>,
    #[serde(default)]
    pub reference: Option<MessageReference>,
    #[serde(flatten)]
    pub body: BasicMessage,
}

/// The message an inbound message replies to. `cached` is the gateway's copy
/// when it had one; otherwise the message is fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReference {
    pub message_id: u64,
    #[serde(default)]
    pub cached: Option<FetchedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingEvent {
    #[serde(default)]
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionEvent {
    #[serde(default)]
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub message_id: u64,
    pub user_id: u64,
    /// Unicode emoji; custom emoji arrive as `None`.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// Dispatch tasks spawned for one relayed message.
#[derive(Debug, Default)]
pub struct FanOut {
    tasks: Vec<(u64, JoinHandle<RelayResult<SyncedMessage>>)>,
}

impl FanOut {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Target channels, in membership order.
    pub fn targets(&self) -> Vec<u64> {
        self.tasks.iter().map(|(channel_id, _)| *channel_id).collect()
    }

    /// Wait for every task and return the mirrors that were recorded.
    /// Failed targets were already logged by their task.
    pub async fn join(self) -> Vec<SyncedMessage> {
        let mut synced = Vec::with_capacity(self.tasks.len());
        for (channel_id, handle) in self.tasks {
            match handle.await {
                Ok(Ok(mirror)) => synced.push(mirror),
                Ok(Err(_)) => {}
                Err(err) => warn!(?err, channel_id, "dispatch task panicked"),
            }
        }
        synced
    }
}

/// What a reply points at, resolved once per inbound message.
#[derive(Debug, Clone)]
struct ReplyContext {
    guild_id: u64,
    replied: FetchedMessage,
    root: Option<OriginalMessage>,
    mirrors: Vec<SyncedMessage>,
    /// Reply to a proxy-sent message starting with `@`: ping the real author.
    ping_author: bool,
}

impl ReplyContext {
    /// A mirror already in `target_channel`, else the root, else the replied
    /// message itself.
    fn jump_url(&self, target_channel: u64) -> String {
        self.mirrors
            .iter()
            .find(|m| m.channel_id == target_channel)
            .map(|m| MessageRef::from(*m).jump_url())
            .or_else(|| self.root.map(|r| MessageRef::from(r).jump_url()))
            .unwrap_or_else(|| jump_url(self.guild_id, self.replied.channel_id, self.replied.id))
    }

    fn embed(&self, target_channel: u64, preview_chars: usize) -> Embed {
        let preview: String = self.replied.content.chars().take(preview_chars).collect();
        Embed {
            author: Some(EmbedAuthor {
                name: self.replied.author.display_name.clone(),
                icon_url: self.replied.author.avatar_url.clone(),
            }),
            description: Some(format!(
                "**[Reply To: ]({}) **{}",
                self.jump_url(target_channel),
                preview
            )),
            ..Default::default()
        }
    }

    fn mention_suffix(&self, target_channel: u64) -> Option<String> {
        match self.root {
            Some(root) if self.ping_author && root.channel_id == target_channel => {
                Some(format!(" <@{}>", root.author_id))
            }
            _ => None,
        }
    }
}

pub struct RelayEngine {
    registry: Arc<LinkRegistry>,
    bans: Arc<BanGate>,
    ledger: Arc<MessageLedger>,
    gateway: Arc<DispatchGateway>,
    platform: Arc<dyn Platform>,
    settings: config::Relay,
}

impl RelayEngine {
    pub fn new(
        registry: Arc<LinkRegistry>,
        bans: Arc<BanGate>,
        ledger: Arc<MessageLedger>,
        gateway: Arc<DispatchGateway>,
        platform: Arc<dyn Platform>,
        settings: config::Relay,
    ) -> Self {
        Self {
            registry,
            bans,
            ledger,
            gateway,
            platform,
            settings,
        }
    }

    /// Record `message` as an original and spawn one dispatch task per other
    /// member channel of its link. Returns immediately after spawning.
    #[instrument(skip_all, fields(message_id = message.id, channel_id = message.channel_id))]
    pub async fn on_message(&self, message: InboundMessage) -> RelayResult<FanOut> {
        let Some(guild_id) = message.guild_id else {
            return Ok(FanOut::default());
        };
        if message.webhook_id.is_some() || message.body.author.bot {
            return Ok(FanOut::default());
        }
        let Some(membership) = self.registry.channel_of(message.channel_id).await? else {
            return Ok(FanOut::default());
        };
        let members = self.registry.members_of(membership.link_id).await?;
        if members.is_empty() {
            return Ok(FanOut::default());
        }

        let original = OriginalMessage {
            message_id: message.id,
            guild_id,
            channel_id: message.channel_id,
            author_id: message.body.author.id,
        };
        self.ledger.record_original(&original).await?;

        let reply = match &message.reference {
            Some(reference) => self.reply_context(&message, guild_id, reference).await?,
            None => None,
        };

        let targets = self.eligible_targets(&message, &members).await?;
        let mut fan_out = FanOut::default();
        for target in targets {
            let embed = reply
                .as_ref()
                .map(|r| r.embed(target.channel_id, self.settings.reply_preview_chars));
            let suffix = reply.as_ref().and_then(|r| r.mention_suffix(target.channel_id));
            let handle = self.spawn_dispatch(target, message.id, message.body.clone(), embed, suffix);
            fan_out.tasks.push((target.channel_id, handle));
        }
        debug!(targets = fan_out.len(), "fan-out scheduled");
        Ok(fan_out)
    }

    /// Other member channels whose guild accepts the author. The first
    /// refusal sends one notice to the author; with `ban_aborts_fanout` it
    /// also stops every later target.
    async fn eligible_targets(
        &self,
        message: &InboundMessage,
        members: &[ChannelMembership],
    ) -> RelayResult<Vec<ChannelMembership>> {
        let author_id = message.body.author.id;
        let mut targets = Vec::new();
        let mut notified = false;
        for target in members.iter().filter(|m| m.channel_id != message.channel_id) {
            if !self.bans.is_banned(target.guild_id, author_id).await? {
                targets.push(*target);
                continue;
            }
            info!(guild_id = target.guild_id, author_id, "author banned in target guild");
            if !notified {
                notified = true;
                let notice = notice::render(&Notice::RelayBanned {
                    guild_id: target.guild_id,
                });
                if let Err(err) = self.platform.send_direct(author_id, &notice).await {
                    warn!(?err, author_id, "failed to send ban notice");
                }
            }
            if self.settings.ban_aborts_fanout {
                break;
            }
        }
        Ok(targets)
    }

    fn spawn_dispatch(
        &self,
        target: ChannelMembership,
        original_id: u64,
        body: BasicMessage,
        embed: Option<Embed>,
        suffix: Option<String>,
    ) -> JoinHandle<RelayResult<SyncedMessage>> {
        let gateway = self.gateway.clone();
        let ledger = self.ledger.clone();
        let platform = self.platform.clone();
        tokio::spawn(async move {
            let channel_id = target.channel_id;
            let message_id = match gateway.send(channel_id, &body, embed, suffix.as_deref()).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(?err, channel_id, original_id, "relay to channel failed");
                    return Err(err);
                }
            };
            let mirror = SyncedMessage {
                message_id,
                original_id,
                guild_id: target.guild_id,
                channel_id,
            };
            if let Err(err) = ledger.record_synced(&mirror).await {
                // Usually the root was deleted mid-send. An unrecorded copy is unreachable.
                warn!(?err, channel_id, original_id, "failed to record mirror; retracting it");
                if let Err(retract) = platform.delete_message(channel_id, message_id).await {
                    warn!(err = ?retract, channel_id, message_id, "failed to retract unrecorded mirror");
                }
                return Err(err);
            }
            Ok(mirror)
        })
    }

    async fn reply_context(
        &self,
        message: &InboundMessage,
        guild_id: u64,
        reference: &MessageReference,
    ) -> RelayResult<Option<ReplyContext>> {
        let replied = match &reference.cached {
            Some(cached) => cached.clone(),
            None => match self
                .platform
                .fetch_message(message.channel_id, reference.message_id)
                .await
            {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(?err, reply_to = reference.message_id, "could not fetch replied-to message");
                    return Ok(None);
                }
            },
        };
        let root = self.ledger.resolve_root(replied.id).await?;
        let mirrors = match root {
            Some(root) => self.ledger.mirrors_of(root.message_id).await?,
            None => Vec::new(),
        };
        let ping_author = replied.webhook_id.is_some() && message.body.content.starts_with('@');
        Ok(Some(ReplyContext {
            guild_id,
            replied,
            root,
            mirrors,
            ping_author,
        }))
    }

    /// Propagate an edit of an original to its mirrors.
    #[instrument(skip(self, content))]
    pub async fn on_edit(&self, channel_id: u64, message_id: u64, content: &str) -> RelayResult<usize> {
        if self.registry.channel_of(channel_id).await?.is_none() {
            return Ok(0);
        }
        self.ledger
            .update_content(&self.gateway, message_id, content)
            .await
    }

    /// Delete the whole mirror set containing `message_id`, except the copy in
    /// `channel_id` which is already gone. Returns how many platform deletes
    /// succeeded.
    #[instrument(skip(self))]
    pub async fn on_delete(&self, channel_id: u64, message_id: u64) -> RelayResult<usize> {
        if self.registry.channel_of(channel_id).await?.is_none() {
            return Ok(0);
        }
        let Some(set) = self.ledger.delete_cascade(message_id).await? else {
            return Ok(0);
        };
        let deletes = set
            .messages
            .iter()
            .filter(|m| m.channel_id != channel_id)
            .map(|m| async move {
                match self.platform.delete_message(m.channel_id, m.message_id).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            ?err,
                            guild_id = m.guild_id,
                            channel_id = m.channel_id,
                            message_id = m.message_id,
                            "failed to delete mirrored message"
                        );
                        false
                    }
                }
            });
        let deleted = join_all(deletes).await.into_iter().filter(|ok| *ok).count();
        info!(root = set.root.message_id, deleted, "mirror set deleted");
        Ok(deleted)
    }

    /// Show the typing indicator in every other member channel.
    pub async fn on_typing(&self, typing: &TypingEvent) -> RelayResult<()> {
        if typing.guild_id.is_none() || typing.bot {
            return Ok(());
        }
        let Some(membership) = self.registry.channel_of(typing.channel_id).await? else {
            return Ok(());
        };
        let members = self.registry.members_of(membership.link_id).await?;
        let triggers = members
            .iter()
            .filter(|m| m.channel_id != typing.channel_id)
            .map(|m| async move {
                if let Err(err) = self.platform.trigger_typing(m.channel_id).await {
                    debug!(?err, channel_id = m.channel_id, "typing relay failed");
                }
            });
        join_all(triggers).await;
        Ok(())
    }

    /// ❓ DMs the reactor where the message came from; 🔔 pings its author.
    #[instrument(skip_all, fields(message_id = reaction.message_id))]
    pub async fn on_reaction(&self, reaction: &ReactionEvent) -> RelayResult<()> {
        if reaction.guild_id.is_none() {
            return Ok(());
        }
        let Some(emoji) = reaction.emoji.as_deref() else {
            return Ok(());
        };
        if emoji != QUESTION && emoji != BELL {
            return Ok(());
        }
        if self.registry.channel_of(reaction.channel_id).await?.is_none() {
            return Ok(());
        }
        let Some(root) = self.ledger.resolve_root(reaction.message_id).await? else {
            return Ok(());
        };

        if emoji == QUESTION {
            let origin = notice::render(&Notice::MessageOrigin {
                author_id: root.author_id,
                guild_id: root.guild_id,
                channel_id: root.channel_id,
            });
            if let Err(err) = self.platform.send_direct(reaction.user_id, &origin).await {
                warn!(?err, user_id = reaction.user_id, "failed to send message origin");
            }
            return Ok(());
        }

        if let Err(err) =
            mention_author(self.platform.as_ref(), reaction.user_id, &root, reaction.channel_id).await
        {
            warn!(?err, user_id = reaction.user_id, "failed to send mention");
        }
        Ok(())
    }

    /// Re-send `messages` into `target_channel` behind a header naming the
    /// requester. Plain runs are merged first. Returns the sent message ids.
    #[instrument(skip(self, messages, requester), fields(count = messages.len()))]
    pub async fn pull_messages(
        &self,
        target_channel: u64,
        messages: &[&ArchivedMessage],
        requester: &Author,
    ) -> RelayResult<Vec<u64>> {
        let Some(first) = messages.first() else {
            return Ok(Vec::new());
        };
        let header = notice::render(&Notice::Pulled {
            requester: requester.clone(),
            count: messages.len(),
            first_jump_url: jump_url(first.guild_id, first.channel_id, first.id),
            started_at: Some(first.created_at),
        });
        self.platform.send_message(target_channel, &header).await?;

        let merged = thread::flatten(messages.iter().map(|m| &m.body));
        let mut sent = Vec::with_capacity(merged.len());
        for message in &merged {
            sent.push(self.gateway.send(target_channel, message, None, None).await?);
        }
        Ok(sent)
    }

    /// Pull the whole conversation `anchor_id` belongs to.
    pub async fn pull_thread(
        &self,
        target_channel: u64,
        history: &[ArchivedMessage],
        anchor_id: u64,
        loose_depth: usize,
        max_depth: Option<usize>,
        requester: &Author,
    ) -> RelayResult<Vec<u64>> {
        let index = thread::build_reply_index(history, loose_depth);
        let messages = thread::conversation(history, &index, anchor_id, max_depth);
        self.pull_messages(target_channel, &messages, requester).await
    }
}

/// Ping the author of `root` in its own channel, and in `from_channel` too
/// when that is a different member channel.
pub async fn mention_author(
    platform: &dyn Platform,
    by_user: u64,
    root: &OriginalMessage,
    from_channel: u64,
) -> anyhow::Result<()> {
    let mention = notice::render(&Notice::Mentioned {
        by_user,
        author_id: root.author_id,
    });
    platform.send_message(root.channel_id, &mention).await?;
    if from_channel != root.channel_id {
        platform.send_message(from_channel, &mention).await?;
    }
    Ok(())
}
