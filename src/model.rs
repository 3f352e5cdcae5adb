use serde::{Deserialize, Serialize};

const JUMP_URL_BASE: &str = "https://discord.com/channels";

/// A group of channels whose messages mirror to one another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub id: u64,
    pub owner_guild: u64,
}

/// Association of one channel to one link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMembership {
    pub channel_id: u64,
    pub guild_id: u64,
    pub link_id: u64,
}

/// First-observed copy of a user's message; root of a mirror set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OriginalMessage {
    pub message_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
}

/// Proxy-sent copy of an original in another member channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncedMessage {
    pub message_id: u64,
    pub original_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
}

/// Platform address of a single message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
}

impl MessageRef {
    pub fn jump_url(&self) -> String {
        jump_url(self.guild_id, self.channel_id, self.message_id)
    }
}

impl From<OriginalMessage> for MessageRef {
    fn from(m: OriginalMessage) -> Self {
        MessageRef {
            guild_id: m.guild_id,
            channel_id: m.channel_id,
            message_id: m.message_id,
        }
    }
}

impl From<SyncedMessage> for MessageRef {
    fn from(m: SyncedMessage) -> Self {
        MessageRef {
            guild_id: m.guild_id,
            channel_id: m.channel_id,
            message_id: m.message_id,
        }
    }
}

pub fn jump_url(guild_id: u64, channel_id: u64, message_id: u64) -> String {
    format!("{}/{}/{}/{}", JUMP_URL_BASE, guild_id, channel_id, message_id)
}

/// Link with its memberships, as shown by the `info` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub link: Link,
    pub members: Vec<ChannelMembership>,
}

impl LinkSummary {
    /// Memberships grouped by guild, in first-seen order.
    pub fn by_guild(&self) -> Vec<(u64, Vec<u64>)> {
        let mut groups: Vec<(u64, Vec<u64>)> = Vec::new();
        for m in &self.members {
            match groups.iter_mut().find(|(g, _)| *g == m.guild_id) {
                Some((_, channels)) => channels.push(m.channel_id),
                None => groups.push((m.guild_id, vec![m.channel_id])),
            }
        }
        groups
    }
}
