//! Database module: mutation result models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: outcome structs returned by transactional repository calls.
//! - `repo`: SQL-only functions that map rows into domain entities.
//!
//! External modules should import from `wormhole::db`; the repository API
//! is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{DeletedSet, Departure, GuildDeparture, Unlinked};
