//! Discord REST implementation of [`Platform`].

use crate::config;
use crate::platform::{
    Author, FetchedMessage, OutgoingMessage, Platform, ProxyEdit, ProxyHandle, ProxySend,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10/";
const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Clone)]
pub struct DiscordRest {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for DiscordRest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordRest")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DiscordRest {
    pub fn new(token: String) -> Result<Self> {
        let base_url = Url::parse(DISCORD_API_BASE).context("invalid default Discord URL")?;
        Self::with_base_url(token, base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("DiscordBot (wormhole, 0.1)")
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &config::Discord) -> Result<Self> {
        let base_url = Url::parse(&cfg.api_base).context("invalid discord.api_base")?;
        Self::with_base_url(cfg.bot_token.clone(), base_url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid Discord endpoint {}", path))
    }

    /// Bot-authenticated request with an optional JSON body.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, self.endpoint(path)?)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().context("failed to build Discord request")
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let request = self.build_request(method, path, body)?;
        debug!(method = %request.method(), url = %request.url(), "sending discord request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Discord")?;
        check_status(res).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        self.send(method, path, body)
            .await?
            .json()
            .await
            .context("invalid Discord response")
    }

    /// Download every attachment and attach it to a multipart form beside
    /// `payload`, which must already list the attachments by index.
    async fn multipart(&self, payload: &Value, send: &ProxySend) -> Result<Form> {
        let mut form = Form::new().text("payload_json", payload.to_string());
        for (i, attachment) in send.attachments.iter().enumerate() {
            let bytes = self
                .http
                .get(&attachment.url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("failed to download {}", attachment.url))?
                .bytes()
                .await
                .context("failed to read attachment body")?;
            let part = Part::bytes(bytes.to_vec()).file_name(attachment.filename.clone());
            form = form.part(format!("files[{}]", i), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl Platform for DiscordRest {
    async fn fetch_message(&self, channel_id: u64, message_id: u64) -> Result<FetchedMessage> {
        let path = format!("channels/{}/messages/{}", channel_id, message_id);
        let message: WireMessage = self.send_json(Method::GET, &path, None).await?;
        Ok(message.into())
    }

    async fn send_message(&self, channel_id: u64, message: &OutgoingMessage) -> Result<u64> {
        let path = format!("channels/{}/messages", channel_id);
        let body = build_message_payload(message);
        let created: Created = self.send_json(Method::POST, &path, Some(&body)).await?;
        Ok(created.id)
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()> {
        let path = format!("channels/{}/messages/{}", channel_id, message_id);
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn send_direct(&self, user_id: u64, message: &OutgoingMessage) -> Result<()> {
        let body = json!({ "recipient_id": user_id.to_string() });
        let dm: Created = self
            .send_json(Method::POST, "users/@me/channels", Some(&body))
            .await?;
        self.send_message(dm.id, message).await?;
        Ok(())
    }

    async fn trigger_typing(&self, channel_id: u64) -> Result<()> {
        let path = format!("channels/{}/typing", channel_id);
        self.send(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn is_banned(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let path = format!("guilds/{}/bans/{}", guild_id, user_id);
        let request = self.build_request(Method::GET, &path, None)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Discord")?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(res).await?;
        Ok(true)
    }

    async fn list_proxies(&self, channel_id: u64) -> Result<Vec<ProxyHandle>> {
        let path = format!("channels/{}/webhooks", channel_id);
        let hooks: Vec<WireWebhook> = self.send_json(Method::GET, &path, None).await?;
        // Webhooks owned by other applications come without a token.
        Ok(hooks
            .into_iter()
            .filter_map(|hook| hook.into_handle(channel_id))
            .collect())
    }

    async fn create_proxy(&self, channel_id: u64, name: &str) -> Result<ProxyHandle> {
        let path = format!("channels/{}/webhooks", channel_id);
        let body = json!({ "name": name });
        let hook: WireWebhook = self.send_json(Method::POST, &path, Some(&body)).await?;
        hook.into_handle(channel_id)
            .ok_or_else(|| anyhow!("created webhook has no token"))
    }

    async fn execute_proxy(&self, proxy: &ProxyHandle, payload: &ProxySend) -> Result<u64> {
        let path = format!("webhooks/{}/{}?wait=true", proxy.id, proxy.token);
        let body = build_proxy_payload(payload);
        if payload.attachments.is_empty() {
            let created: Created = self.send_json(Method::POST, &path, Some(&body)).await?;
            return Ok(created.id);
        }
        let form = self.multipart(&body, payload).await?;
        let res = self
            .http
            .post(self.endpoint(&path)?)
            .header("Authorization", format!("Bot {}", self.token))
            .multipart(form)
            .send()
            .await
            .context("failed to reach Discord")?;
        let created: Created = check_status(res)
            .await?
            .json()
            .await
            .context("invalid Discord response")?;
        Ok(created.id)
    }

    async fn edit_proxy_message(
        &self,
        proxy: &ProxyHandle,
        message_id: u64,
        edit: &ProxyEdit,
    ) -> Result<()> {
        let path = format!("webhooks/{}/{}/messages/{}", proxy.id, proxy.token, message_id);
        let body = json!({
            "content": edit.content,
            "allowed_mentions": { "parse": ["users"] },
        });
        self.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }
}

async fn check_status(res: Response) -> Result<Response> {
    let status = res.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("received 429 from Discord: {}", body));
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("discord error {}: {}", status, body));
    }
    Ok(res)
}

/// Bot message body. Notices never ping anyone except explicitly listed users.
pub fn build_message_payload(message: &OutgoingMessage) -> Value {
    json!({
        "content": message.content,
        "embeds": message.embeds,
        "allowed_mentions": { "parse": ["users"] },
    })
}

/// Webhook execute body. Attachments are listed by index; the files travel
/// as multipart parts named `files[i]`.
pub fn build_proxy_payload(send: &ProxySend) -> Value {
    let mut body = json!({
        "username": send.username,
        "content": send.content,
        "embeds": send.embeds,
        "allowed_mentions": { "parse": ["users"] },
    });
    if let Some(avatar) = &send.avatar_url {
        body["avatar_url"] = json!(avatar);
    }
    if !send.attachments.is_empty() {
        let listed: Vec<Value> = send
            .attachments
            .iter()
            .enumerate()
            .map(|(i, a)| json!({ "id": i, "filename": a.filename }))
            .collect();
        body["attachments"] = Value::Array(listed);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSnowflake {
    Text(String),
    Number(u64),
}

impl RawSnowflake {
    fn parse<E: de::Error>(self) -> std::result::Result<u64, E> {
        match self {
            RawSnowflake::Text(s) => s.parse().map_err(E::custom),
            RawSnowflake::Number(n) => Ok(n),
        }
    }
}

fn snowflake<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    RawSnowflake::deserialize(d)?.parse()
}

fn optional_snowflake<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<u64>, D::Error> {
    Option::<RawSnowflake>::deserialize(d)?
        .map(RawSnowflake::parse)
        .transpose()
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    bot: bool,
}

impl From<WireUser> for Author {
    fn from(user: WireUser) -> Self {
        let avatar_url = user
            .avatar
            .map(|hash| format!("{}/avatars/{}/{}.png", CDN_BASE, user.id, hash));
        Author {
            id: user.id,
            display_name: user.global_name.unwrap_or(user.username),
            avatar_url,
            bot: user.bot,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    #[serde(deserialize_with = "snowflake")]
    channel_id: u64,
    author: WireUser,
    #[serde(default)]
    content: String,
    #[serde(default, deserialize_with = "optional_snowflake")]
    webhook_id: Option<u64>,
}

impl From<WireMessage> for FetchedMessage {
    fn from(m: WireMessage) -> Self {
        FetchedMessage {
            id: m.id,
            channel_id: m.channel_id,
            author: m.author.into(),
            content: m.content,
            webhook_id: m.webhook_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireWebhook {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl WireWebhook {
    fn into_handle(self, channel_id: u64) -> Option<ProxyHandle> {
        Some(ProxyHandle {
            id: self.id,
            token: self.token?,
            channel_id,
            name: self.name.unwrap_or_default(),
        })
    }
}
