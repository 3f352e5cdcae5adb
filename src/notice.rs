//! User-facing notices. The engine hands over plain data; everything about
//! wording and embed layout lives here.

use crate::platform::{Author, Embed, EmbedAuthor, OutgoingMessage};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Sent to an author whose message a target guild refused to relay.
    RelayBanned { guild_id: u64 },
    /// Broadcast to member channels when a new channel joins the link.
    ChannelJoined { guild_id: u64, channel_id: u64 },
    /// Header posted before a batch of pulled messages.
    Pulled {
        requester: Author,
        count: usize,
        first_jump_url: String,
        started_at: Option<DateTime<Utc>>,
    },
    /// Ping of an original author on behalf of someone in another channel.
    Mentioned { by_user: u64, author_id: u64 },
    /// Where a relayed message really came from.
    MessageOrigin {
        author_id: u64,
        guild_id: u64,
        channel_id: u64,
    },
    About,
}

const ABOUT: &str = "Hello there! I link different channels together through *time and space!* \
(Well, it's really just discord servers). When a channel is linked (entangled) all messages get synced. \
It may appear that some people are bots, but that is just a discord limitation.\n\n\
In a linked channel you can use `/info <channel>` to get current information. \
React with \u{2753} to get information about a message, or with \u{1f514} to ping its author.\n\n\
__**To setup**__\n\
With `Manage Guild` permissions use `/createlink <channel>` to create a link, then \
`/invitecode <linkid>` to create an invite code other servers can use with `/link <code> <channel>`.";

pub fn render(notice: &Notice) -> OutgoingMessage {
    match notice {
        Notice::RelayBanned { guild_id } => OutgoingMessage {
            content: String::new(),
            embeds: vec![Embed {
                title: Some("Message not relayed".to_string()),
                description: Some(format!(
                    "You are banned from sending messages to links that reach guild `{}`.",
                    guild_id
                )),
                ..Default::default()
            }],
        },
        Notice::ChannelJoined {
            guild_id,
            channel_id,
        } => OutgoingMessage {
            content: String::new(),
            embeds: vec![Embed {
                title: Some("New entanglement!".to_string()),
                description: Some(format!(
                    "Guild `{}` (<#{}>) is now entangled with this channel!",
                    guild_id, channel_id
                )),
                ..Default::default()
            }],
        },
        Notice::Pulled {
            requester,
            count,
            first_jump_url,
            started_at,
        } => OutgoingMessage {
            content: String::new(),
            embeds: vec![Embed {
                description: Some(format!(
                    "<@{}> Pulled {} messages starting from **[here]({})**",
                    requester.id, count, first_jump_url
                )),
                author: Some(EmbedAuthor {
                    name: format!("Requested by {}", requester.display_name),
                    icon_url: requester.avatar_url.clone(),
                }),
                timestamp: started_at.map(|t| t.to_rfc3339()),
                ..Default::default()
            }],
        },
        Notice::Mentioned { by_user, author_id } => OutgoingMessage {
            content: format!("<@{}>", author_id),
            embeds: vec![Embed {
                description: Some(format!("You got mentioned by <@{}> (`{}`)", by_user, by_user)),
                ..Default::default()
            }],
        },
        Notice::MessageOrigin {
            author_id,
            guild_id,
            channel_id,
        } => OutgoingMessage {
            content: String::new(),
            embeds: vec![Embed {
                description: Some(format!(
                    "Author: <@{}> (ID: `{}`)\nGuild ID: `{}`\nChannel: <#{}> (ID: `{}`)",
                    author_id, author_id, guild_id, channel_id, channel_id
                )),
                ..Default::default()
            }],
        },
        Notice::About => OutgoingMessage {
            content: ABOUT.to_string(),
            embeds: Vec::new(),
        },
    }
}
