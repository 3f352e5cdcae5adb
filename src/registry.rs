//! Link registry: the link/channel membership graph.
//!
//! Every lookup goes through a memo cache and every mutation invalidates the
//! channel, member-list and link entries it touched, plus the proxy handle
//! of any channel whose membership changed.

use crate::cache::MemoCache;
use crate::config;
use crate::db::{self, GuildDeparture, Pool};
use crate::error::{RelayError, RelayResult};
use crate::expiring::ExpiringMap;
use crate::model::{ChannelMembership, Link, LinkSummary};
use crate::notice::{self, Notice};
use crate::platform::{Platform, ProxyHandle};
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const INVITE_CODE_BITS: u32 = 28;

pub struct LinkRegistry {
    pool: Pool,
    platform: Arc<dyn Platform>,
    invites: ExpiringMap<u32, u64>,
    channels: MemoCache<u64, Option<ChannelMembership>>,
    members: MemoCache<u64, Vec<ChannelMembership>>,
    links: MemoCache<u64, Option<Link>>,
    proxies: Arc<MemoCache<u64, ProxyHandle>>,
}

impl LinkRegistry {
    pub fn new(
        pool: Pool,
        platform: Arc<dyn Platform>,
        proxies: Arc<MemoCache<u64, ProxyHandle>>,
        caches: &config::Cache,
        invite_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            platform,
            invites: ExpiringMap::new(invite_ttl),
            channels: MemoCache::new(caches.channels),
            members: MemoCache::new(caches.members),
            links: MemoCache::new(caches.links),
            proxies,
        }
    }

    pub async fn channel_of(&self, channel_id: u64) -> RelayResult<Option<ChannelMembership>> {
        let pool = &self.pool;
        Ok(self
            .channels
            .get(channel_id, move || db::find_membership(pool, channel_id))
            .await?)
    }

    pub async fn members_of(&self, link_id: u64) -> RelayResult<Vec<ChannelMembership>> {
        let pool = &self.pool;
        Ok(self
            .members
            .get(link_id, move || db::link_memberships(pool, link_id))
            .await?)
    }

    pub async fn link_info(&self, link_id: u64) -> RelayResult<Option<Link>> {
        let pool = &self.pool;
        Ok(self.links.get(link_id, move || db::find_link(pool, link_id)).await?)
    }

    /// Link and memberships of the link `channel_id` belongs to.
    pub async fn summary(&self, channel_id: u64) -> RelayResult<LinkSummary> {
        let membership = self
            .channel_of(channel_id)
            .await?
            .ok_or(RelayError::NotLinked)?;
        let link = self
            .link_info(membership.link_id)
            .await?
            .ok_or(RelayError::NotLinked)?;
        let members = self.members_of(link.id).await?;
        Ok(LinkSummary { link, members })
    }

    #[instrument(skip(self))]
    pub async fn create_link(&self, owner_guild: u64, channel_id: u64) -> RelayResult<Link> {
        if self.channel_of(channel_id).await?.is_some() {
            return Err(RelayError::AlreadyLinked);
        }
        let link = db::create_link(&self.pool, owner_guild, channel_id)
            .await
            .map_err(already_linked_on_conflict)?;
        self.invalidate(channel_id, link.id);
        info!(link_id = link.id, channel_id, owner_guild, "created link");
        Ok(link)
    }

    /// Issue a single-use invite code for `link_id`.
    #[instrument(skip(self))]
    pub async fn issue_invite(&self, link_id: u64) -> RelayResult<u32> {
        if self.link_info(link_id).await?.is_none() {
            return Err(RelayError::LinkGone);
        }
        let code = {
            let mut rng = rand::thread_rng();
            loop {
                let candidate = rng.gen_range(0..1u32 << INVITE_CODE_BITS);
                if !self.invites.contains(&candidate) {
                    break candidate;
                }
            }
        };
        self.invites.insert(code, link_id);
        info!(link_id, "issued invite");
        Ok(code)
    }

    #[instrument(skip(self))]
    pub async fn join_link(&self, code: u32, guild_id: u64, channel_id: u64) -> RelayResult<Link> {
        if !self.invites.contains(&code) {
            return Err(RelayError::InvalidInvite);
        }
        if self.channel_of(channel_id).await?.is_some() {
            return Err(RelayError::AlreadyLinked);
        }
        let link_id = self.invites.take(&code).ok_or(RelayError::InvalidInvite)?;
        let link = self.link_info(link_id).await?.ok_or(RelayError::LinkGone)?;
        let joined = db::join_link(&self.pool, link_id, guild_id, channel_id)
            .await
            .map_err(already_linked_on_conflict)?;
        self.invalidate(channel_id, link_id);
        if !joined {
            return Err(RelayError::LinkGone);
        }
        info!(link_id, channel_id, guild_id, "channel joined link");

        let notice = &notice::render(&Notice::ChannelJoined {
            guild_id,
            channel_id,
        });
        let members = self.members_of(link_id).await?;
        let sends = members
            .iter()
            .filter(|m| m.channel_id != channel_id)
            .map(|m| async move {
                if let Err(err) = self.platform.send_message(m.channel_id, notice).await {
                    warn!(?err, channel_id = m.channel_id, "failed to broadcast join notice");
                }
            });
        join_all(sends).await;
        Ok(link)
    }

    #[instrument(skip(self))]
    pub async fn leave_link(&self, channel_id: u64) -> RelayResult<ChannelMembership> {
        let unlinked = db::delete_membership(&self.pool, channel_id)
            .await?
            .ok_or(RelayError::NotLinked)?;
        let link_id = unlinked.membership.link_id;
        self.invalidate(channel_id, link_id);
        info!(link_id, channel_id, link_deleted = unlinked.link_deleted, "channel left link");
        Ok(unlinked.membership)
    }

    /// Apply the ownership-migration policy for a guild the bot was removed from.
    #[instrument(skip(self))]
    pub async fn remove_guild(&self, guild_id: u64) -> RelayResult<Vec<GuildDeparture>> {
        let departures = db::remove_guild(&self.pool, guild_id).await?;
        for departure in &departures {
            self.links.invalidate(&departure.link_id);
            self.members.invalidate(&departure.link_id);
            for channel_id in &departure.removed_channels {
                self.channels.invalidate(channel_id);
                self.proxies.invalidate(channel_id);
            }
            info!(
                guild_id,
                link_id = departure.link_id,
                outcome = ?departure.outcome,
                "guild removed from link"
            );
        }
        Ok(departures)
    }

    fn invalidate(&self, channel_id: u64, link_id: u64) {
        self.channels.invalidate(&channel_id);
        self.members.invalidate(&link_id);
        self.links.invalidate(&link_id);
        self.proxies.invalidate(&channel_id);
    }
}

fn already_linked_on_conflict(err: sqlx::Error) -> RelayError {
    if db::is_unique_violation(&err) {
        RelayError::AlreadyLinked
    } else {
        RelayError::Store(err)
    }
}
