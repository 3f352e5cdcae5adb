use super::model::{DeletedSet, Departure, GuildDeparture, Unlinked};
use crate::model::{ChannelMembership, Link, MessageRef, OriginalMessage, SyncedMessage};
use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    if normalized.starts_with("sqlite::memory") {
        // Every connection to :memory: is a distinct database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&normalized)
            .await?;
        return Ok(pool);
    }
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Three-round Feistel permutation of the low 32 bits. Sequential inputs
/// map to unique, scattered-looking outputs.
pub fn pseudo_encrypt(value: u64) -> u64 {
    let mut l1 = (value >> 16) & 0xffff;
    let mut r1 = value & 0xffff;
    for _ in 0..3 {
        let l2 = r1;
        let round = (((1366 * r1 + 150_889) % 714_025) as f64 / 714_025.0 * 32767.0).round();
        let r2 = l1 ^ (round as u64);
        l1 = l2;
        r1 = r2;
    }
    (r1 << 16) + l1
}

fn link_from_row(row: &SqliteRow) -> Link {
    Link {
        id: row.get::<i64, _>("id") as u64,
        owner_guild: row.get::<i64, _>("owner_guild") as u64,
    }
}

fn membership_from_row(row: &SqliteRow) -> ChannelMembership {
    ChannelMembership {
        channel_id: row.get::<i64, _>("channel_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        link_id: row.get::<i64, _>("link_id") as u64,
    }
}

fn original_from_row(row: &SqliteRow) -> OriginalMessage {
    OriginalMessage {
        message_id: row.get::<i64, _>("message_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        channel_id: row.get::<i64, _>("channel_id") as u64,
        author_id: row.get::<i64, _>("author_id") as u64,
    }
}

fn synced_from_row(row: &SqliteRow) -> SyncedMessage {
    SyncedMessage {
        message_id: row.get::<i64, _>("message_id") as u64,
        original_id: row.get::<i64, _>("original_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        channel_id: row.get::<i64, _>("channel_id") as u64,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

// ---- links & memberships ----

#[instrument(skip_all)]
pub async fn create_link(pool: &Pool, owner_guild: u64, channel_id: u64) -> sqlx::Result<Link> {
    let mut tx = pool.begin().await?;
    let seq: i64 = sqlx::query_scalar("INSERT INTO link_sequence DEFAULT VALUES RETURNING value")
        .fetch_one(&mut *tx)
        .await?;
    let link = Link {
        id: pseudo_encrypt(seq as u64),
        owner_guild,
    };
    sqlx::query("INSERT INTO links (id, owner_guild) VALUES (?, ?)")
        .bind(link.id as i64)
        .bind(owner_guild as i64)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO channels (link_id, guild_id, channel_id) VALUES (?, ?, ?)")
        .bind(link.id as i64)
        .bind(owner_guild as i64)
        .bind(channel_id as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(link)
}

/// Insert a membership if the link still exists. Returns `false` when it does not.
#[instrument(skip_all)]
pub async fn join_link(
    pool: &Pool,
    link_id: u64,
    guild_id: u64,
    channel_id: u64,
) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE id = ?")
        .bind(link_id as i64)
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Ok(false);
    }
    sqlx::query("INSERT INTO channels (link_id, guild_id, channel_id) VALUES (?, ?, ?)")
        .bind(link_id as i64)
        .bind(guild_id as i64)
        .bind(channel_id as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

#[instrument(skip_all)]
pub async fn find_link(pool: &Pool, link_id: u64) -> sqlx::Result<Option<Link>> {
    let row = sqlx::query("SELECT id, owner_guild FROM links WHERE id = ?")
        .bind(link_id as i64)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(link_from_row))
}

#[instrument(skip_all)]
pub async fn find_membership(
    pool: &Pool,
    channel_id: u64,
) -> sqlx::Result<Option<ChannelMembership>> {
    let row = sqlx::query("SELECT channel_id, guild_id, link_id FROM channels WHERE channel_id = ?")
        .bind(channel_id as i64)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(membership_from_row))
}

/// Memberships of a link in join order.
#[instrument(skip_all)]
pub async fn link_memberships(pool: &Pool, link_id: u64) -> sqlx::Result<Vec<ChannelMembership>> {
    let rows = sqlx::query(
        "SELECT channel_id, guild_id, link_id FROM channels WHERE link_id = ? ORDER BY rowid",
    )
    .bind(link_id as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(membership_from_row).collect())
}

#[instrument(skip_all)]
pub async fn delete_membership(pool: &Pool, channel_id: u64) -> sqlx::Result<Option<Unlinked>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "DELETE FROM channels WHERE channel_id = ? RETURNING channel_id, guild_id, link_id",
    )
    .bind(channel_id as i64)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let membership = membership_from_row(&row);
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE link_id = ?")
        .bind(membership.link_id as i64)
        .fetch_one(&mut *tx)
        .await?;
    let link_deleted = remaining == 0;
    if link_deleted {
        sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(membership.link_id as i64)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(Some(Unlinked {
        membership,
        link_deleted,
    }))
}

/// Drop a guild from every link it owns or belongs to.
///
/// A link owned by the departing guild passes to the earliest-joined other
/// guild; with no other guild left the link is deleted outright.
#[instrument(skip_all)]
pub async fn remove_guild(pool: &Pool, guild_id: u64) -> sqlx::Result<Vec<GuildDeparture>> {
    let gid = guild_id as i64;
    let mut tx = pool.begin().await?;
    let link_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM links WHERE owner_guild = ? UNION SELECT link_id FROM channels WHERE guild_id = ?",
    )
    .bind(gid)
    .bind(gid)
    .fetch_all(&mut *tx)
    .await?;

    let mut departures = Vec::with_capacity(link_ids.len());
    for link_id in link_ids {
        let Some(owner) =
            sqlx::query_scalar::<_, i64>("SELECT owner_guild FROM links WHERE id = ?")
                .bind(link_id)
                .fetch_optional(&mut *tx)
                .await?
        else {
            continue;
        };
        let members: Vec<ChannelMembership> = sqlx::query(
            "SELECT channel_id, guild_id, link_id FROM channels WHERE link_id = ? ORDER BY rowid",
        )
        .bind(link_id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(membership_from_row)
        .collect();
        let (own, others): (Vec<_>, Vec<_>) =
            members.into_iter().partition(|m| m.guild_id == guild_id);

        let departure = if others.is_empty() {
            sqlx::query("DELETE FROM channels WHERE link_id = ?")
                .bind(link_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM links WHERE id = ?")
                .bind(link_id)
                .execute(&mut *tx)
                .await?;
            GuildDeparture {
                link_id: link_id as u64,
                outcome: Departure::Deleted,
                removed_channels: own.iter().map(|m| m.channel_id).collect(),
            }
        } else {
            sqlx::query("DELETE FROM channels WHERE link_id = ? AND guild_id = ?")
                .bind(link_id)
                .bind(gid)
                .execute(&mut *tx)
                .await?;
            let outcome = if owner == gid {
                let new_owner = others[0].guild_id;
                sqlx::query("UPDATE links SET owner_guild = ? WHERE id = ?")
                    .bind(new_owner as i64)
                    .bind(link_id)
                    .execute(&mut *tx)
                    .await?;
                Departure::Transferred { new_owner }
            } else {
                Departure::Dropped
            };
            GuildDeparture {
                link_id: link_id as u64,
                outcome,
                removed_channels: own.iter().map(|m| m.channel_id).collect(),
            }
        };
        departures.push(departure);
    }
    tx.commit().await?;
    Ok(departures)
}

// ---- message ledger ----

#[instrument(skip_all)]
pub async fn insert_original(pool: &Pool, msg: &OriginalMessage) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO original_messages (message_id, guild_id, channel_id, author_id) VALUES (?, ?, ?, ?)",
    )
    .bind(msg.message_id as i64)
    .bind(msg.guild_id as i64)
    .bind(msg.channel_id as i64)
    .bind(msg.author_id as i64)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_synced(pool: &Pool, msg: &SyncedMessage) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO synced_messages (message_id, original_id, guild_id, channel_id) VALUES (?, ?, ?, ?)",
    )
    .bind(msg.message_id as i64)
    .bind(msg.original_id as i64)
    .bind(msg.guild_id as i64)
    .bind(msg.channel_id as i64)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_original(pool: &Pool, message_id: u64) -> sqlx::Result<Option<OriginalMessage>> {
    let row = sqlx::query(
        "SELECT message_id, guild_id, channel_id, author_id FROM original_messages WHERE message_id = ?",
    )
    .bind(message_id as i64)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(original_from_row))
}

async fn root_in(
    conn: &mut SqliteConnection,
    message_id: u64,
) -> sqlx::Result<Option<OriginalMessage>> {
    let direct = sqlx::query(
        "SELECT message_id, guild_id, channel_id, author_id FROM original_messages WHERE message_id = ?",
    )
    .bind(message_id as i64)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(row) = direct {
        return Ok(Some(original_from_row(&row)));
    }
    let via_mirror = sqlx::query(
        "SELECT message_id, guild_id, channel_id, author_id FROM original_messages \
         WHERE message_id = (SELECT original_id FROM synced_messages WHERE message_id = ?)",
    )
    .bind(message_id as i64)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(via_mirror.as_ref().map(original_from_row))
}

/// The original for `message_id`, whether it names the original or one of its mirrors.
#[instrument(skip_all)]
pub async fn find_root(pool: &Pool, message_id: u64) -> sqlx::Result<Option<OriginalMessage>> {
    let mut conn = pool.acquire().await?;
    root_in(&mut *conn, message_id).await
}

#[instrument(skip_all)]
pub async fn synced_for_original(
    pool: &Pool,
    original_id: u64,
) -> sqlx::Result<Vec<SyncedMessage>> {
    let rows = sqlx::query(
        "SELECT message_id, original_id, guild_id, channel_id FROM synced_messages \
         WHERE original_id = ? ORDER BY rowid",
    )
    .bind(original_id as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(synced_from_row).collect())
}

/// Delete the whole mirror set containing `message_id` in one transaction.
#[instrument(skip_all)]
pub async fn delete_message_set(pool: &Pool, message_id: u64) -> sqlx::Result<Option<DeletedSet>> {
    let mut tx = pool.begin().await?;
    let Some(root) = root_in(&mut *tx, message_id).await? else {
        return Ok(None);
    };
    let mirrors: Vec<SyncedMessage> = sqlx::query(
        "SELECT message_id, original_id, guild_id, channel_id FROM synced_messages \
         WHERE original_id = ? ORDER BY rowid",
    )
    .bind(root.message_id as i64)
    .fetch_all(&mut *tx)
    .await?
    .iter()
    .map(synced_from_row)
    .collect();
    sqlx::query("DELETE FROM synced_messages WHERE original_id = ?")
        .bind(root.message_id as i64)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM original_messages WHERE message_id = ?")
        .bind(root.message_id as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let mut messages = Vec::with_capacity(mirrors.len() + 1);
    messages.push(MessageRef::from(root));
    messages.extend(mirrors.into_iter().map(MessageRef::from));
    Ok(Some(DeletedSet { root, messages }))
}

// ---- relay bans ----

#[instrument(skip_all)]
pub async fn insert_ban(pool: &Pool, guild_id: u64, user_id: u64) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO banned (guild_id, user_id) VALUES (?, ?) ON CONFLICT DO NOTHING")
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_ban(pool: &Pool, guild_id: u64, user_id: u64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM banned WHERE guild_id = ? AND user_id = ?")
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn ban_exists(pool: &Pool, guild_id: u64, user_id: u64) -> sqlx::Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM banned WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}
