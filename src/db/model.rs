//! Result shapes of multi-statement repository operations.
//!
//! Plain rows map straight onto the domain types in `crate::model`; the
//! structs here describe what a transactional mutation changed so callers
//! can invalidate exactly the cache entries it touched.

use crate::model::{ChannelMembership, MessageRef, OriginalMessage};

/// Outcome of removing one channel from its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlinked {
    pub membership: ChannelMembership,
    /// The link had no memberships left and was deleted with it.
    pub link_deleted: bool,
}

/// What happened to one link when a guild left the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The guild was a plain member; its channels were dropped.
    Dropped,
    /// The guild owned the link; ownership moved to `new_owner`.
    Transferred { new_owner: u64 },
    /// Nobody else was left; the link and every membership are gone.
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildDeparture {
    pub link_id: u64,
    pub outcome: Departure,
    /// Every channel whose membership row was deleted.
    pub removed_channels: Vec<u64>,
}

/// Rows removed by a cascade delete of one mirror set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedSet {
    pub root: OriginalMessage,
    /// The root and every mirror, as platform message addresses.
    pub messages: Vec<MessageRef>,
}
