//! Chat platform collaborator: the message primitives the engine consumes.
//!
//! The engine never talks to the gateway or REST API directly; it goes
//! through [`Platform`], which `DiscordRest` implements over HTTP and the
//! test suites implement with recording fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Author plus the parts of a message that are copied onto mirrors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasicMessage {
    pub author: Author,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub content: String,
}

/// Channel-scoped proxy sender (a webhook on Discord).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyHandle {
    pub id: u64,
    pub token: String,
    pub channel_id: u64,
    pub name: String,
}

/// Payload for a proxy send. Only user mentions are ever allowed to ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySend {
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub embeds: Vec<Embed>,
    pub attachments: Vec<Attachment>,
}

/// Payload for a proxy edit. Identity fields are not representable here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEdit {
    pub content: String,
}

/// Plain bot-authored message (notices, command replies, mentions).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
}

/// A message as fetched from the platform, used for reply context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub webhook_id: Option<u64>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn fetch_message(&self, channel_id: u64, message_id: u64) -> Result<FetchedMessage>;

    async fn send_message(&self, channel_id: u64, message: &OutgoingMessage) -> Result<u64>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()>;

    async fn send_direct(&self, user_id: u64, message: &OutgoingMessage) -> Result<()>;

    async fn trigger_typing(&self, channel_id: u64) -> Result<()>;

    /// Whether the platform's own ban list for `guild_id` contains `user_id`.
    async fn is_banned(&self, guild_id: u64, user_id: u64) -> Result<bool>;

    async fn list_proxies(&self, channel_id: u64) -> Result<Vec<ProxyHandle>>;

    async fn create_proxy(&self, channel_id: u64, name: &str) -> Result<ProxyHandle>;

    /// Send through a proxy and wait for the created message id.
    async fn execute_proxy(&self, proxy: &ProxyHandle, payload: &ProxySend) -> Result<u64>;

    async fn edit_proxy_message(
        &self,
        proxy: &ProxyHandle,
        message_id: u64,
        edit: &ProxyEdit,
    ) -> Result<()>;
}
