#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use wormhole::config;
use wormhole::db::{self, Pool};
use wormhole::platform::{
    Attachment, Author, BasicMessage, FetchedMessage, OutgoingMessage, Platform, ProxyEdit,
    ProxyHandle, ProxySend,
};
use wormhole::relay::InboundMessage;
use wormhole::Wormhole;

#[derive(Debug, Clone)]
pub struct ProxyCall {
    pub channel_id: u64,
    pub proxy_id: u64,
    pub payload: ProxySend,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct EditCall {
    pub channel_id: u64,
    pub proxy_id: u64,
    pub message_id: u64,
    pub edit: ProxyEdit,
}

/// Platform fake: records every call and fails on demand.
#[derive(Default)]
pub struct RecordingPlatform {
    next_id: AtomicU64,
    pub sent: Mutex<Vec<(u64, OutgoingMessage)>>,
    pub direct: Mutex<Vec<(u64, OutgoingMessage)>>,
    pub deleted: Mutex<Vec<(u64, u64)>>,
    pub typing: Mutex<Vec<u64>>,
    pub executed: Mutex<Vec<ProxyCall>>,
    pub edits: Mutex<Vec<EditCall>>,
    pub proxies: Mutex<HashMap<u64, Vec<ProxyHandle>>>,
    pub list_calls: Mutex<Vec<u64>>,
    pub created_proxies: Mutex<Vec<u64>>,
    pub messages: Mutex<HashMap<u64, FetchedMessage>>,
    pub platform_bans: Mutex<HashSet<(u64, u64)>>,
    pub ban_lookup_fails: Mutex<HashSet<u64>>,
    /// Channel -> number of upcoming proxy sends that fail.
    pub failing_sends: Mutex<HashMap<u64, usize>>,
    /// Channels whose proxy rejects any payload carrying attachments.
    pub reject_attachments: Mutex<HashSet<u64>>,
    pub failing_deletes: Mutex<HashSet<u64>>,
    pub direct_fails: Mutex<bool>,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1_000_000),
            ..Default::default()
        })
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn fail_sends(&self, channel_id: u64, times: usize) {
        self.failing_sends.lock().await.insert(channel_id, times);
    }

    pub async fn executed_in(&self, channel_id: u64) -> Vec<ProxyCall> {
        self.executed
            .lock()
            .await
            .iter()
            .filter(|c| c.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub async fn sent_to(&self, channel_id: u64) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn fetch_message(&self, channel_id: u64, message_id: u64) -> Result<FetchedMessage> {
        self.messages
            .lock()
            .await
            .get(&message_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown message {} in {}", message_id, channel_id))
    }

    async fn send_message(&self, channel_id: u64, message: &OutgoingMessage) -> Result<u64> {
        self.sent.lock().await.push((channel_id, message.clone()));
        Ok(self.id())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()> {
        if self.failing_deletes.lock().await.contains(&channel_id) {
            return Err(anyhow!("unknown channel {}", channel_id));
        }
        self.deleted.lock().await.push((channel_id, message_id));
        Ok(())
    }

    async fn send_direct(&self, user_id: u64, message: &OutgoingMessage) -> Result<()> {
        if *self.direct_fails.lock().await {
            return Err(anyhow!("cannot DM {}", user_id));
        }
        self.direct.lock().await.push((user_id, message.clone()));
        Ok(())
    }

    async fn trigger_typing(&self, channel_id: u64) -> Result<()> {
        self.typing.lock().await.push(channel_id);
        Ok(())
    }

    async fn is_banned(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        if self.ban_lookup_fails.lock().await.contains(&guild_id) {
            return Err(anyhow!("missing ban permission in {}", guild_id));
        }
        Ok(self.platform_bans.lock().await.contains(&(guild_id, user_id)))
    }

    async fn list_proxies(&self, channel_id: u64) -> Result<Vec<ProxyHandle>> {
        self.list_calls.lock().await.push(channel_id);
        Ok(self
            .proxies
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_proxy(&self, channel_id: u64, name: &str) -> Result<ProxyHandle> {
        let handle = ProxyHandle {
            id: self.id(),
            token: format!("token-{}", channel_id),
            channel_id,
            name: name.to_string(),
        };
        self.created_proxies.lock().await.push(channel_id);
        self.proxies
            .lock()
            .await
            .entry(channel_id)
            .or_default()
            .push(handle.clone());
        Ok(handle)
    }

    async fn execute_proxy(&self, proxy: &ProxyHandle, payload: &ProxySend) -> Result<u64> {
        let channel_id = proxy.channel_id;
        let mut fail = false;
        {
            let mut failing = self.failing_sends.lock().await;
            if let Some(left) = failing.get_mut(&channel_id) {
                if *left > 0 {
                    *left -= 1;
                    fail = true;
                }
            }
        }
        if !payload.attachments.is_empty()
            && self.reject_attachments.lock().await.contains(&channel_id)
        {
            fail = true;
        }
        self.executed.lock().await.push(ProxyCall {
            channel_id,
            proxy_id: proxy.id,
            payload: payload.clone(),
            ok: !fail,
        });
        if fail {
            return Err(anyhow!("send to {} rejected", channel_id));
        }
        Ok(self.id())
    }

    async fn edit_proxy_message(
        &self,
        proxy: &ProxyHandle,
        message_id: u64,
        edit: &ProxyEdit,
    ) -> Result<()> {
        self.edits.lock().await.push(EditCall {
            channel_id: proxy.channel_id,
            proxy_id: proxy.id,
            message_id,
            edit: edit.clone(),
        });
        Ok(())
    }
}

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn setup() -> (Wormhole, Arc<RecordingPlatform>) {
    setup_with(config::Relay::default()).await
}

pub async fn setup_with(relay: config::Relay) -> (Wormhole, Arc<RecordingPlatform>) {
    let pool = setup_pool().await;
    let platform = RecordingPlatform::new();
    let app = Wormhole::new(pool, platform.clone(), &relay, &config::Cache::default());
    (app, platform)
}

pub fn author(id: u64) -> Author {
    Author {
        id,
        display_name: format!("user{}", id),
        avatar_url: Some(format!("https://cdn.test/avatars/{}.png", id)),
        bot: false,
    }
}

pub fn inbound(id: u64, guild_id: u64, channel_id: u64, author_id: u64, content: &str) -> InboundMessage {
    InboundMessage {
        id,
        guild_id: Some(guild_id),
        channel_id,
        webhook_id: None,
        reference: None,
        body: BasicMessage {
            author: author(author_id),
            attachments: Vec::new(),
            embeds: Vec::new(),
            content: content.to_string(),
        },
    }
}

pub fn attachment(name: &str) -> Attachment {
    Attachment {
        filename: name.to_string(),
        url: format!("https://cdn.test/files/{}", name),
        size: 8 * 1024 * 1024,
    }
}

/// Create a link owned by the first `(guild, channel)` and join the rest.
pub async fn linked(app: &Wormhole, members: &[(u64, u64)]) -> u64 {
    let (owner, first) = members[0];
    let link = app.registry.create_link(owner, first).await.unwrap();
    for &(guild_id, channel_id) in &members[1..] {
        let code = app.registry.issue_invite(link.id).await.unwrap();
        app.registry.join_link(code, guild_id, channel_id).await.unwrap();
    }
    link.id
}
