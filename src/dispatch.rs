//! Per-channel proxy-identity sender with one attachment-free retry.

use crate::cache::MemoCache;
use crate::error::{RelayError, RelayResult};
use crate::platform::{BasicMessage, Embed, Platform, ProxyEdit, ProxyHandle, ProxySend};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

static MASS_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(everyone|here)").expect("valid mass mention regex"));

pub struct DispatchGateway {
    platform: Arc<dyn Platform>,
    proxies: Arc<MemoCache<u64, ProxyHandle>>,
    proxy_name: String,
}

impl DispatchGateway {
    pub fn new(
        platform: Arc<dyn Platform>,
        proxies: Arc<MemoCache<u64, ProxyHandle>>,
        proxy_name: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            proxies,
            proxy_name: proxy_name.into(),
        }
    }

    /// Cached proxy for `channel_id`; an existing one with our name is reused,
    /// otherwise one is created.
    async fn proxy_for(&self, channel_id: u64) -> anyhow::Result<ProxyHandle> {
        let platform = &self.platform;
        let name = self.proxy_name.as_str();
        self.proxies
            .get(channel_id, move || async move {
                let existing = platform.list_proxies(channel_id).await?;
                if let Some(proxy) = existing.into_iter().find(|p| p.name == name) {
                    return Ok(proxy);
                }
                debug!(channel_id, "creating proxy identity");
                platform.create_proxy(channel_id, name).await
            })
            .await
    }

    /// Send `message` into `channel_id` as its author. If the send fails it is
    /// retried once without attachments; a second failure is returned.
    #[instrument(skip(self, message, reply_embed, mention_suffix))]
    pub async fn send(
        &self,
        channel_id: u64,
        message: &BasicMessage,
        reply_embed: Option<Embed>,
        mention_suffix: Option<&str>,
    ) -> RelayResult<u64> {
        let proxy = self
            .proxy_for(channel_id)
            .await
            .map_err(|source| RelayError::DispatchFailed { channel_id, source })?;
        let payload = compose(message, reply_embed, mention_suffix);
        match self.platform.execute_proxy(&proxy, &payload).await {
            Ok(id) => Ok(id),
            Err(err) => {
                warn!(?err, channel_id, "proxy send failed; retrying without attachments");
                let stripped = ProxySend {
                    attachments: Vec::new(),
                    ..payload
                };
                self.platform
                    .execute_proxy(&proxy, &stripped)
                    .await
                    .map_err(|source| {
                        // The proxy may have been deleted out from under us.
                        self.proxies.invalidate(&channel_id);
                        RelayError::DispatchFailed { channel_id, source }
                    })
            }
        }
    }

    /// Replace the content of a proxy-sent message. Name and avatar stay as sent.
    #[instrument(skip(self, content))]
    pub async fn edit(&self, channel_id: u64, message_id: u64, content: &str) -> RelayResult<()> {
        let proxy = self
            .proxy_for(channel_id)
            .await
            .map_err(|source| RelayError::DispatchFailed { channel_id, source })?;
        let edit = ProxyEdit {
            content: sanitize(content),
        };
        self.platform
            .edit_proxy_message(&proxy, message_id, &edit)
            .await
            .map_err(|source| RelayError::DispatchFailed { channel_id, source })
    }
}

/// Build the proxy payload: the author's identity, content plus optional
/// mention suffix, the author's embeds followed by the reply embed.
pub fn compose(
    message: &BasicMessage,
    reply_embed: Option<Embed>,
    mention_suffix: Option<&str>,
) -> ProxySend {
    let mut content = sanitize(&message.content);
    if let Some(suffix) = mention_suffix {
        content.push_str(suffix);
    }
    let mut embeds = message.embeds.clone();
    embeds.extend(reply_embed);
    ProxySend {
        username: message.author.display_name.clone(),
        avatar_url: message.author.avatar_url.clone(),
        content,
        embeds,
        attachments: message.attachments.clone(),
    }
}

/// Break `@everyone` and `@here` so relayed text can never mass-ping.
pub fn sanitize(content: &str) -> String {
    MASS_MENTION.replace_all(content, "@\u{200b}$1").into_owned()
}
