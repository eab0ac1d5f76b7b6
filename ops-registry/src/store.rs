use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ops_api::{Error, Result};
use ops_core::{
    ChatId, ItemDna, Listing, ListingStatus, PlatformId, PlayerHome, RegistryStoreT,
    WithdrawalStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::schema::init_tables;

/// A single embedded relational database with one writer. Every public
/// method here is a short transaction; there are no long-held write
/// transactions. See `local-db::LocalDbStorage` (teacher) for the shape.
pub struct RegistryStore {
    conn: Arc<Mutex<Connection>>,
}

fn status_from_str(s: &str) -> Result<ListingStatus> {
    match s {
        "active" => Ok(ListingStatus::Active),
        "sold" => Ok(ListingStatus::Sold),
        other => Err(Error::Storage(format!("unknown listing status: {other}"))),
    }
}

fn withdrawal_status_str(status: WithdrawalStatus) -> &'static str {
    match status {
        WithdrawalStatus::Pending => "PENDING",
        WithdrawalStatus::Completed => "COMPLETED",
        WithdrawalStatus::ErrorReview => "ERROR_REVIEW",
    }
}

impl RegistryStore {
    pub fn try_new(db_file_path: &str) -> Result<Self> {
        let conn = Connection::open(db_file_path).map_err(|e| Error::Storage(e.to_string()))?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn try_new_mem() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Scan a legacy per-server playtime DB once at boot and fold any
    /// `discord_id`/`vip_level` columns into the global `identities` and
    /// `entitlements` tables. Idempotent: `bind_identity` is an upsert and
    /// the entitlement level only ever moves up (highest level wins).
    pub async fn migrate_legacy_playtime_db(&self, legacy_db_path: &str) -> Result<usize> {
        let legacy = Connection::open_with_flags(
            legacy_db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let mut columns = Vec::new();
        {
            let mut stmt = legacy
                .prepare("PRAGMA table_info(player_time)")
                .map_err(|e| Error::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(|e| Error::Storage(e.to_string()))?;
            for r in rows {
                columns.push(r.map_err(|e| Error::Storage(e.to_string()))?);
            }
        }
        if !columns.iter().any(|c| c == "discord_id") {
            return Ok(0);
        }
        let has_vip = columns.iter().any(|c| c == "vip_level");

        let query = if has_vip {
            "SELECT platform_id, discord_id, vip_level FROM player_time WHERE discord_id IS NOT NULL"
        } else {
            "SELECT platform_id, discord_id, 0 FROM player_time WHERE discord_id IS NOT NULL"
        };

        let mut stmt = legacy.prepare(query).map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let platform_id: String = row.get(0)?;
                let discord_id: i64 = row.get(1)?;
                let vip_level: i64 = row.get(2)?;
                Ok((platform_id, discord_id, vip_level as u32))
            })
            .map_err(|e| Error::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(e.to_string()))?;
        drop(stmt);
        drop(legacy);

        let mut migrated = 0usize;
        for (platform_id, chat_id, level) in rows {
            self.bind_identity(&platform_id, chat_id).await?;
            let current = {
                let conn = self.conn.lock().await;
                conn.query_row(
                    "SELECT level FROM entitlements WHERE chat_id = ?1",
                    params![chat_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(|e| Error::Storage(e.to_string()))?
                .unwrap_or(0) as u32
            };
            if level > current {
                self.set_entitlement(chat_id, level, None).await?;
            }
            migrated += 1;
        }
        Ok(migrated)
    }
}

#[async_trait]
impl RegistryStoreT for RegistryStore {
    async fn bind_identity(&self, platform_id: &str, chat_id: ChatId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO identities (platform_id, chat_id) VALUES (?1, ?2)
             ON CONFLICT(platform_id) DO UPDATE SET chat_id = excluded.chat_id",
            params![platform_id, chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn resolve_identity(
        &self,
        platform_ids: &[PlatformId],
    ) -> Result<HashMap<PlatformId, (Option<ChatId>, u32, Option<chrono::NaiveDate>)>> {
        let conn = self.conn.lock().await;
        let today = chrono::Utc::now().date_naive();
        let mut out = HashMap::new();
        for pid in platform_ids {
            let chat_id: Option<ChatId> = conn
                .query_row(
                    "SELECT chat_id FROM identities WHERE platform_id = ?1",
                    params![pid],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Storage(e.to_string()))?
                .flatten();

            let (level, expiry) = if let Some(cid) = chat_id {
                let row: Option<(i64, Option<String>)> = conn
                    .query_row(
                        "SELECT level, expiry FROM entitlements WHERE chat_id = ?1",
                        params![cid],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(|e| Error::Storage(e.to_string()))?;

                match row {
                    Some((level, expiry_str)) => {
                        let expiry = expiry_str
                            .map(|s| chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
                            .transpose()
                            .map_err(|e| Error::Storage(e.to_string()))?;
                        let effective_level = match expiry {
                            Some(date) if date < today => 0,
                            _ => level as u32,
                        };
                        (effective_level, expiry)
                    }
                    None => (0, None),
                }
            } else {
                (0, None)
            };
            out.insert(pid.clone(), (chat_id, level, expiry));
        }
        Ok(out)
    }

    async fn set_entitlement(
        &self,
        chat_id: ChatId,
        level: u32,
        expiry: Option<chrono::NaiveDate>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO entitlements (chat_id, level, expiry) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET level = excluded.level, expiry = excluded.expiry",
            params![chat_id, level, expiry.map(|d| d.to_string())],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_balance(&self, chat_id: ChatId) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT balance FROM wallets WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?
            .unwrap_or(0))
    }

    async fn add_balance(&self, chat_id: ChatId, delta: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO wallets (chat_id, balance) VALUES (?1, 0)",
            params![chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let changed = conn
            .execute(
                "UPDATE wallets SET balance = balance + ?1 WHERE chat_id = ?2 AND balance + ?1 >= 0",
                params![delta, chat_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(Error::InsufficientFunds);
        }

        conn.query_row(
            "SELECT balance FROM wallets WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(e.to_string()))
    }

    async fn create_listing(
        &self,
        seller_chat_id: ChatId,
        item_template_id: i64,
        dna: &ItemDna,
        price: u32,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let dna_json = serde_json::to_string(dna).map_err(|e| Error::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO market_listings (seller_chat_id, item_template_id, item_dna, price, status)
             VALUES (?1, ?2, ?3, ?4, 'active')",
            params![seller_chat_id, item_template_id, dna_json, price],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>> {
        let conn = self.conn.lock().await;
        row_to_listing(&conn, listing_id)
    }

    async fn list_active_listings(&self, limit: u32) -> Result<Vec<Listing>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id FROM market_listings WHERE status = 'active' ORDER BY created_at DESC LIMIT ?1")
            .map_err(|e| Error::Storage(e.to_string()))?;
        let ids: Vec<i64> = stmt
            .query_map(params![limit], |row| row.get(0))
            .map_err(|e| Error::Storage(e.to_string()))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(listing) = row_to_listing(&conn, id)? {
                out.push(listing);
            }
        }
        Ok(out)
    }

    async fn execute_purchase(&self, buyer_chat_id: ChatId, listing_id: i64) -> Result<Listing> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| Error::Storage(e.to_string()))?;

        let (seller_chat_id, price, status): (ChatId, i64, String) = tx
            .query_row(
                "SELECT seller_chat_id, price, status FROM market_listings WHERE id = ?1",
                params![listing_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?
            .ok_or(Error::ListingNotActive)?;

        if status != "active" || seller_chat_id == buyer_chat_id {
            return Err(Error::ListingNotActive);
        }

        tx.execute(
            "INSERT OR IGNORE INTO wallets (chat_id, balance) VALUES (?1, 0)",
            params![buyer_chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let debited = tx
            .execute(
                "UPDATE wallets SET balance = balance - ?1 WHERE chat_id = ?2 AND balance - ?1 >= 0",
                params![price, buyer_chat_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        if debited == 0 {
            return Err(Error::InsufficientFunds);
        }

        tx.execute(
            "INSERT OR IGNORE INTO wallets (chat_id, balance) VALUES (?1, 0)",
            params![seller_chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        tx.execute(
            "UPDATE wallets SET balance = balance + ?1 WHERE chat_id = ?2",
            params![price, seller_chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let sold = tx
            .execute(
                "UPDATE market_listings SET status = 'sold' WHERE id = ?1 AND status = 'active'",
                params![listing_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        if sold == 0 {
            return Err(Error::ListingNotActive);
        }

        let listing = row_to_listing(&tx, listing_id)?.ok_or(Error::ListingNotActive)?;
        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(listing)
    }

    async fn compensate_purchase(
        &self,
        listing_id: i64,
        buyer_chat_id: ChatId,
        price: u32,
        seller_chat_id: ChatId,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "UPDATE wallets SET balance = balance + ?1 WHERE chat_id = ?2",
            params![price, buyer_chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        tx.execute(
            "UPDATE wallets SET balance = balance - ?1 WHERE chat_id = ?2",
            params![price, seller_chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        tx.execute(
            "UPDATE market_listings SET status = 'active' WHERE id = ?1 AND status = 'sold'",
            params![listing_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn open_withdrawal(
        &self,
        chat_id: ChatId,
        amount: u32,
        character_name: &str,
        server_name: &str,
    ) -> Result<Option<i64>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "INSERT OR IGNORE INTO wallets (chat_id, balance) VALUES (?1, 0)",
            params![chat_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let debited = tx
            .execute(
                "UPDATE wallets SET balance = balance - ?1 WHERE chat_id = ?2 AND balance - ?1 >= 0",
                params![amount, chat_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        if debited == 0 {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO withdraw_transactions (chat_id, amount, character_name, server_name, status)
             VALUES (?1, ?2, ?3, ?4, 'PENDING')",
            params![chat_id, amount, character_name, server_name],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        let tx_id = tx.last_insert_rowid();
        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Some(tx_id))
    }

    async fn close_withdrawal(&self, tx_id: i64, status: WithdrawalStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE withdraw_transactions SET status = ?1 WHERE id = ?2",
            params![withdrawal_status_str(status), tx_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn log_market_action(&self, chat_id: ChatId, action: &str, details: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO market_audit (chat_id, action, details) VALUES (?1, ?2, ?3)",
            params![chat_id, action, details],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_home(&self, platform_id: &str, server_name: &str) -> Result<Option<PlayerHome>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT x, y, z FROM player_homes WHERE platform_id = ?1 AND server_name = ?2",
            params![platform_id, server_name],
            |row| {
                Ok(PlayerHome {
                    x: row.get(0)?,
                    y: row.get(1)?,
                    z: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Storage(e.to_string()))
    }

    async fn set_home(&self, platform_id: &str, server_name: &str, home: PlayerHome) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO player_homes (platform_id, server_name, x, y, z) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(platform_id, server_name) DO UPDATE SET x = excluded.x, y = excluded.y, z = excluded.z",
            params![platform_id, server_name, home.x, home.y, home.z],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn bump_playtime(&self, platform_id: &str, server_name: &str, minutes: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO player_time (platform_id, server_name, online_minutes) VALUES (?1, ?2, ?3)
             ON CONFLICT(platform_id, server_name) DO UPDATE SET online_minutes = online_minutes + ?3",
            params![platform_id, server_name, minutes as i64],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_playtime(&self, platform_id: &str, server_name: &str) -> Result<(u64, u64)> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT online_minutes, last_reward_playtime FROM player_time WHERE platform_id = ?1 AND server_name = ?2",
                params![platform_id, server_name],
                |row| {
                    let a: i64 = row.get(0)?;
                    let b: i64 = row.get(1)?;
                    Ok((a as u64, b as u64))
                },
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?
            .unwrap_or((0, 0)))
    }

    async fn set_last_reward_playtime(&self, platform_id: &str, server_name: &str, value: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO player_time (platform_id, server_name, last_reward_playtime) VALUES (?1, ?2, ?3)
             ON CONFLICT(platform_id, server_name) DO UPDATE SET last_reward_playtime = excluded.last_reward_playtime",
            params![platform_id, server_name, value as i64],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}

fn row_to_listing(conn: &Connection, listing_id: i64) -> Result<Option<Listing>> {
    conn.query_row(
        "SELECT id, seller_chat_id, item_template_id, item_dna, price, status, created_at
         FROM market_listings WHERE id = ?1",
        params![listing_id],
        |row| {
            let id: i64 = row.get(0)?;
            let seller_chat_id: ChatId = row.get(1)?;
            let item_template_id: i64 = row.get(2)?;
            let dna_json: String = row.get(3)?;
            let price: i64 = row.get(4)?;
            let status: String = row.get(5)?;
            let created_at: String = row.get(6)?;
            Ok((id, seller_chat_id, item_template_id, dna_json, price, status, created_at))
        },
    )
    .optional()
    .map_err(|e| Error::Storage(e.to_string()))?
    .map(|(id, seller_chat_id, item_template_id, dna_json, price, status, created_at)| {
        let item_dna: ItemDna =
            serde_json::from_str(&dna_json).map_err(|e| Error::Storage(e.to_string()))?;
        let created_at = chrono::NaiveDateTime::parse_from_str(&created_at, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Listing {
            listing_id: id,
            seller_chat_id,
            item_template_id,
            item_dna,
            price: price as u32,
            status: status_from_str(&status)?,
            created_at,
        })
    })
    .transpose()
}
