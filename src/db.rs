use crate::models::{Credential, SelectedPlaylist};
use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = include_str!("../db/schema.sql");

pub fn open_or_create(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn ts(secs: i64) -> Result<chrono::DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp {} in credentials table", secs))
}

/// Load the live credential, if any. Should more than one row exist the
/// oldest one wins, matching the "one record per deployment" contract.
pub fn load_credential(conn: &Connection) -> Result<Option<Credential>> {
    let mut stmt = conn.prepare(
        "SELECT id, access_token, refresh_token, expires_at, created_at FROM credentials ORDER BY created_at ASC LIMIT 1",
    )?;
    let row = stmt
        .query_row([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .optional()?;
    match row {
        Some((id, access_token, refresh_token, expires_at, created_at)) => Ok(Some(Credential {
            id,
            access_token,
            refresh_token,
            expires_at: ts(expires_at)?,
            created_at: ts(created_at)?,
        })),
        None => Ok(None),
    }
}

pub fn insert_credential(conn: &Connection, cred: &Credential) -> Result<()> {
    conn.execute(
        "INSERT INTO credentials (id, access_token, refresh_token, expires_at, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s','now'))",
        params![
            cred.id,
            cred.access_token,
            cred.refresh_token,
            cred.expires_at.timestamp(),
            cred.created_at.timestamp()
        ],
    )?;
    log::debug!("inserted credential {}", cred.id);
    Ok(())
}

/// Update the token fields of an existing credential in place.
pub fn update_credential(conn: &Connection, cred: &Credential) -> Result<()> {
    let changed = conn.execute(
        "UPDATE credentials SET access_token = ?2, refresh_token = ?3, expires_at = ?4, updated_at = strftime('%s','now') WHERE id = ?1",
        params![
            cred.id,
            cred.access_token,
            cred.refresh_token,
            cred.expires_at.timestamp()
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("credential {} not found", cred.id));
    }
    Ok(())
}

pub fn delete_credential(conn: &Connection, id: &str) -> Result<usize> {
    let removed = conn.execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
    log::info!("deleted credential {} ({} row(s))", id, removed);
    Ok(removed)
}

pub fn load_selected_playlist(conn: &Connection) -> Result<Option<SelectedPlaylist>> {
    let mut stmt =
        conn.prepare("SELECT playlist_id, name FROM selected_playlist WHERE slot = 0 LIMIT 1")?;
    let row = stmt
        .query_row([], |r| {
            Ok(SelectedPlaylist {
                playlist_id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .optional()?;
    Ok(row)
}

pub fn save_selected_playlist(conn: &Connection, selected: &SelectedPlaylist) -> Result<()> {
    conn.execute(
        "INSERT INTO selected_playlist (slot, playlist_id, name, updated_at) VALUES (0, ?1, ?2, strftime('%s','now')) ON CONFLICT(slot) DO UPDATE SET playlist_id = excluded.playlist_id, name = excluded.name, updated_at = strftime('%s','now')",
        params![selected.playlist_id, selected.name],
    )?;
    Ok(())
}

pub fn clear_selected_playlist(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM selected_playlist", [])?;
    Ok(())
}
