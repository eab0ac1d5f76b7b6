use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ops_api::{Error, Result};
use ops_core::{GameDbReaderT, PlatformId};
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};
use tokio::sync::Mutex;
use tracing::warn;

use crate::chunk::chunks;

/// Read-only handle on a single server's game database. Opened with
/// `mode=ro`; never issues a write. Every query failure is folded into
/// [`ops_api::Error::DbUnavailable`] so callers can fall back to a cache
/// rather than abort.
pub struct GameDbReader {
    conn: Mutex<Connection>,
}

impl GameDbReader {
    pub fn try_new(db_path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| Error::DbUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn placeholders(n: usize) -> String {
        std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
    }
}

#[async_trait]
impl GameDbReaderT for GameDbReader {
    async fn batch_levels(&self, char_names: &[String]) -> Result<HashMap<String, u32>> {
        let mut out: HashMap<String, u32> = char_names.iter().map(|n| (n.clone(), 0)).collect();
        if char_names.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock().await;
        for chunk in chunks(char_names) {
            let sql = format!(
                "SELECT char_name, level FROM characters WHERE char_name IN ({})",
                Self::placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    let name: String = row.get(0)?;
                    let level: i64 = row.get(1)?;
                    Ok((name, level as u32))
                })
                .map_err(|e| Error::DbUnavailable(e.to_string()))?;
            for r in rows {
                let (name, level) = r.map_err(|e| Error::DbUnavailable(e.to_string()))?;
                out.insert(name, level);
            }
        }
        Ok(out)
    }

    async fn batch_platform_ids(&self, char_names: &[String]) -> Result<HashMap<String, PlatformId>> {
        let mut out = HashMap::new();
        if char_names.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock().await;
        for chunk in chunks(char_names) {
            let sql = format!(
                "SELECT c.char_name, a.platformId FROM characters c
                 JOIN account a ON c.playerId = a.id
                 WHERE c.char_name IN ({})",
                Self::placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    let name: String = row.get(0)?;
                    let platform_id: String = row.get(1)?;
                    Ok((name, platform_id))
                })
                .map_err(|e| Error::DbUnavailable(e.to_string()))?;
            for r in rows {
                let (name, pid) = r.map_err(|e| Error::DbUnavailable(e.to_string()))?;
                out.insert(name, pid);
            }
        }
        Ok(out)
    }

    async fn batch_guild_ids(&self, char_names: &[String]) -> Result<HashMap<String, i64>> {
        let mut out = HashMap::new();
        if char_names.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock().await;
        for chunk in chunks(char_names) {
            let sql = format!(
                "SELECT char_name, guild FROM characters WHERE char_name IN ({}) AND guild > 0",
                Self::placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    let name: String = row.get(0)?;
                    let guild: i64 = row.get(1)?;
                    Ok((name, guild))
                })
                .map_err(|e| Error::DbUnavailable(e.to_string()))?;
            for r in rows {
                let (name, guild) = r.map_err(|e| Error::DbUnavailable(e.to_string()))?;
                out.insert(name, guild);
            }
        }
        Ok(out)
    }

    async fn char_id_by_name(&self, char_name: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id FROM characters WHERE char_name = ?1",
            [char_name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::DbUnavailable(e.to_string()))
    }

    async fn read_inventory_item(
        &self,
        owner_id: i64,
        slot: i64,
        inv_type: i32,
    ) -> Result<Option<(i64, Vec<u8>)>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT template_id, data FROM item_inventory
             WHERE owner_id = ?1 AND item_id = ?2 AND inv_type = ?3",
            rusqlite::params![owner_id, slot, inv_type],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| Error::DbUnavailable(e.to_string()))
    }

    async fn inventory_rows_for_template(
        &self,
        owner_id: i64,
        template_id: i64,
    ) -> Result<Vec<(i32, i64)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT inv_type, item_id FROM item_inventory
                 WHERE owner_id = ?1 AND template_id = ?2",
            )
            .map_err(|e| Error::DbUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![owner_id, template_id], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::DbUnavailable(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::DbUnavailable(e.to_string()))
    }

    async fn resolve_owners(&self, owner_ids: &[i64]) -> Result<HashMap<i64, Vec<PlatformId>>> {
        let mut out: HashMap<i64, Vec<PlatformId>> = HashMap::new();
        if owner_ids.is_empty() {
            return Ok(out);
        }
        let conn = self.conn.lock().await;

        let mut guild_ids: HashSet<i64> = HashSet::new();
        for chunk in chunks(owner_ids) {
            let sql = format!(
                "SELECT guildId FROM guilds WHERE guildId IN ({})",
                Self::placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))
                .map_err(|e| Error::DbUnavailable(e.to_string()))?;
            for r in rows {
                guild_ids.insert(r.map_err(|e| Error::DbUnavailable(e.to_string()))?);
            }
        }

        if !guild_ids.is_empty() {
            let guild_ids: Vec<i64> = guild_ids.into_iter().collect();
            for chunk in chunks(&guild_ids) {
                let sql = format!(
                    "SELECT c.guild, a.platformId FROM characters c
                     JOIN account a ON c.playerId = a.id
                     WHERE c.guild IN ({})",
                    Self::placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| {
                        let guild: i64 = row.get(0)?;
                        let platform_id: String = row.get(1)?;
                        Ok((guild, platform_id))
                    })
                    .map_err(|e| Error::DbUnavailable(e.to_string()))?;
                for r in rows {
                    let (guild, pid) = r.map_err(|e| Error::DbUnavailable(e.to_string()))?;
                    out.entry(guild).or_default().push(pid);
                }
            }
        }

        let remaining: Vec<i64> = owner_ids
            .iter()
            .copied()
            .filter(|id| !out.contains_key(id))
            .collect();
        if !remaining.is_empty() {
            for chunk in chunks(&remaining) {
                let sql = format!(
                    "SELECT c.id, a.platformId FROM characters c
                     JOIN account a ON c.playerId = a.id
                     WHERE c.id IN ({})",
                    Self::placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql).map_err(|e| Error::DbUnavailable(e.to_string()))?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| {
                        let char_id: i64 = row.get(0)?;
                        let platform_id: String = row.get(1)?;
                        Ok((char_id, platform_id))
                    })
                    .map_err(|e| Error::DbUnavailable(e.to_string()))?;
                for r in rows {
                    let (char_id, pid) = r.map_err(|e| Error::DbUnavailable(e.to_string()))?;
                    out.entry(char_id).or_default().push(pid);
                }
            }
        }

        let unresolved = owner_ids.iter().filter(|id| !out.contains_key(id)).count();
        if unresolved > 0 {
            warn!("{unresolved} owner ids resolved to neither a guild nor a character");
        }

        Ok(out)
    }
}
