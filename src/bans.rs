//! Per-guild relay eligibility.

use crate::cache::MemoCache;
use crate::db::{self, Pool};
use crate::error::RelayResult;
use crate::platform::Platform;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct BanGate {
    pool: Pool,
    platform: Arc<dyn Platform>,
    cache: MemoCache<(u64, u64), bool>,
}

impl BanGate {
    pub fn new(pool: Pool, platform: Arc<dyn Platform>, capacity: usize) -> Self {
        Self {
            pool,
            platform,
            cache: MemoCache::new(capacity),
        }
    }

    /// Platform ban list first, then the local relay ban table.
    /// A failing platform lookup counts as not banned.
    pub async fn is_banned(&self, guild_id: u64, user_id: u64) -> RelayResult<bool> {
        let pool = &self.pool;
        let platform = &self.platform;
        let banned = self
            .cache
            .get((guild_id, user_id), move || async move {
                match platform.is_banned(guild_id, user_id).await {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            ?err,
                            guild_id, user_id, "platform ban lookup failed; treating as not banned"
                        );
                    }
                }
                db::ban_exists(pool, guild_id, user_id).await
            })
            .await?;
        Ok(banned)
    }

    #[instrument(skip(self))]
    pub async fn ban(&self, guild_id: u64, user_id: u64) -> RelayResult<()> {
        db::insert_ban(&self.pool, guild_id, user_id).await?;
        self.invalidate(guild_id, user_id);
        info!(guild_id, user_id, "relay ban added");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unban(&self, guild_id: u64, user_id: u64) -> RelayResult<()> {
        db::delete_ban(&self.pool, guild_id, user_id).await?;
        self.invalidate(guild_id, user_id);
        info!(guild_id, user_id, "relay ban removed");
        Ok(())
    }

    /// Drop the cached verdict, e.g. after a platform ban or unban event.
    pub fn invalidate(&self, guild_id: u64, user_id: u64) {
        self.cache.invalidate(&(guild_id, user_id));
    }
}
