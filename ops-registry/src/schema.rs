use ops_api::{Error, Result};
use rusqlite::Connection;

pub(crate) fn init_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS identities (
            platform_id TEXT PRIMARY KEY,
            chat_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS entitlements (
            chat_id INTEGER PRIMARY KEY,
            level INTEGER NOT NULL DEFAULT 0,
            expiry TEXT
        );

        CREATE TABLE IF NOT EXISTS wallets (
            chat_id INTEGER PRIMARY KEY,
            balance INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS market_listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            seller_chat_id INTEGER NOT NULL,
            item_template_id INTEGER NOT NULL,
            item_dna TEXT NOT NULL,
            price INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS withdraw_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            character_name TEXT NOT NULL,
            server_name TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS market_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS player_time (
            platform_id TEXT NOT NULL,
            server_name TEXT NOT NULL,
            online_minutes INTEGER NOT NULL DEFAULT 0,
            last_reward_playtime INTEGER NOT NULL DEFAULT 0,
            last_rewarded_hour INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (platform_id, server_name)
        );

        CREATE TABLE IF NOT EXISTS player_homes (
            platform_id TEXT NOT NULL,
            server_name TEXT NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL,
            PRIMARY KEY (platform_id, server_name)
        );
        ",
    )
    .map_err(|e| Error::Storage(e.to_string()))?;
    Ok(())
}
