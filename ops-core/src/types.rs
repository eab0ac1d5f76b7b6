//! Domain entities shared across the operations plane.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque cross-service identifier the game's account table uses for a user
/// (e.g. a Steam id).
pub type PlatformId = String;

/// Opaque identifier the chat transport uses for a user.
pub type ChatId = i64;

/// `identities(platform_id PK, chat_id)` — many-to-one, stable once bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    pub platform_id: PlatformId,
    pub chat_id: Option<ChatId>,
}

/// `entitlements(chat_id PK, level, expiry)`. Level 0 is the default for an
/// absent row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub chat_id: ChatId,
    pub level: u32,
    pub expiry: Option<chrono::NaiveDate>,
}

impl Default for Entitlement {
    fn default() -> Self {
        Self {
            chat_id: 0,
            level: 0,
            expiry: None,
        }
    }
}

/// `player_time(platform_id, server_name, online_minutes,
/// last_reward_playtime, last_rewarded_hour)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaytimeRow {
    pub platform_id: PlatformId,
    pub server_name: String,
    pub online_minutes: u64,
    pub last_reward_playtime: u64,
}

/// `wallets(chat_id PK, balance)`. Invariant: `balance >= 0` at all
/// committed states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub chat_id: ChatId,
    pub balance: i64,
}

/// The structured stat payload decoded from an item's binary `data` blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDna {
    pub int_stats: HashMap<u32, u32>,
    pub float_stats: HashMap<u32, OrderedFloat>,
}

/// Wraps `f32` with the bit-for-bit `PartialEq`/`Serialize` the registry's
/// JSON DNA column needs; item stats are opaque game data, never arithmetic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f32);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

/// Property id reserved for an item's instance GUID; must never be copied
/// across items when cloning DNA into a listing.
pub const PROP_ID_INSTANCE_GUID: u32 = 22;
/// Property id for stack quantity.
pub const PROP_ID_STACK_QTY: u32 = 1;
/// Property id reserved by the sell mark-verify-delete protocol.
pub const PROP_ID_SELL_MARK: u32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Active,
    Sold,
}

/// `market_listings(id PK, seller_chat_id, item_template_id, item_dna JSON,
/// price, status, created_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: i64,
    pub seller_chat_id: ChatId,
    pub item_template_id: i64,
    pub item_dna: ItemDna,
    pub price: u32,
    pub status: ListingStatus,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    ErrorReview,
}

/// `withdraw_transactions(id PK, chat_id, amount, character_name,
/// server_name, status, created_at)`. Append-only audit journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalTx {
    pub tx_id: i64,
    pub chat_id: ChatId,
    pub amount: u32,
    pub character_name: String,
    pub server_name: String,
    pub status: WithdrawalStatus,
    pub created_at: chrono::NaiveDateTime,
}

/// In-memory only, keyed by a short random code minted by `/register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    pub code: String,
    pub chat_id: ChatId,
    pub expires_at: chrono::NaiveDateTime,
    pub character_name: Option<String>,
}

/// `player_homes(platform_id, server_name, x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerHome {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A row parsed from the RCON `ListPlayers` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub session_idx: u32,
    pub char_name: String,
    pub platform_id: PlatformId,
}

/// Reward interval table, keyed by entitlement level, in minutes.
pub type RewardIntervals = HashMap<u32, u64>;

/// Config-derived, read-only at runtime.
#[derive(Debug, Clone)]
pub struct ServerProfile {
    pub name: String,
    pub rcon_ip: String,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub chat_channel_id: ChatId,
    pub game_db_path: String,
    pub log_path: String,
    pub reward_enabled: bool,
    pub reward_intervals: RewardIntervals,
    pub reward_item_id: i64,
    pub reward_quantity: u32,
    pub currency_item_id: i64,
    pub currency_name: String,
    pub sync_wait: std::time::Duration,
    pub marketplace_enabled: bool,
}
