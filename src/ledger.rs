//! Original/mirror message ledger.

use crate::db::{self, DeletedSet, Pool};
use crate::dispatch::DispatchGateway;
use crate::error::RelayResult;
use crate::model::{OriginalMessage, SyncedMessage};
use futures::future::join_all;
use tracing::{debug, instrument, warn};

pub struct MessageLedger {
    pool: Pool,
}

impl MessageLedger {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn record_original(&self, msg: &OriginalMessage) -> RelayResult<()> {
        db::insert_original(&self.pool, msg).await?;
        Ok(())
    }

    pub async fn record_synced(&self, msg: &SyncedMessage) -> RelayResult<()> {
        db::insert_synced(&self.pool, msg).await?;
        Ok(())
    }

    /// The original behind `message_id`, whether it is the original itself or a mirror.
    pub async fn resolve_root(&self, message_id: u64) -> RelayResult<Option<OriginalMessage>> {
        Ok(db::find_root(&self.pool, message_id).await?)
    }

    pub async fn mirrors_of(&self, original_id: u64) -> RelayResult<Vec<SyncedMessage>> {
        Ok(db::synced_for_original(&self.pool, original_id).await?)
    }

    /// Remove the mirror set containing `message_id`. Returns every message of
    /// the set (root and mirrors) so the caller can delete them on the platform.
    #[instrument(skip(self))]
    pub async fn delete_cascade(&self, message_id: u64) -> RelayResult<Option<DeletedSet>> {
        Ok(db::delete_message_set(&self.pool, message_id).await?)
    }

    /// Push new content of an original to all of its mirrors. Edits of mirrors
    /// or unknown messages are ignored. Returns how many mirrors were updated.
    #[instrument(skip(self, gateway, content))]
    pub async fn update_content(
        &self,
        gateway: &DispatchGateway,
        original_id: u64,
        content: &str,
    ) -> RelayResult<usize> {
        if db::find_original(&self.pool, original_id).await?.is_none() {
            debug!(original_id, "edit of a message that is not an original");
            return Ok(0);
        }
        let mirrors = self.mirrors_of(original_id).await?;
        let edits = mirrors.iter().map(|m| async move {
            match gateway.edit(m.channel_id, m.message_id, content).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        ?err,
                        channel_id = m.channel_id,
                        message_id = m.message_id,
                        "failed to edit mirror"
                    );
                    false
                }
            }
        });
        let updated = join_all(edits).await.into_iter().filter(|ok| *ok).count();
        Ok(updated)
    }
}
