use crate::types::{ChatId, ItemDna, Listing, PlatformId, PlayerHome, WithdrawalStatus};
use async_trait::async_trait;
use ops_api::Result;
use std::collections::HashMap;

/// The registry exclusively owns identities, entitlements, wallets,
/// listings, and the withdrawal journal. Every write here is a short
/// transaction; there are no long-held write transactions.
#[async_trait]
pub trait RegistryStoreT: Send + Sync {
    /// Idempotent upsert of the platform-id -> chat-id binding.
    async fn bind_identity(&self, platform_id: &str, chat_id: ChatId) -> Result<()>;

    /// Batch lookup: platform_id -> (chat_id, entitlement_level, expiry).
    /// `entitlement_level` is already folded to 0 if `expiry` is in the
    /// past; `expiry` itself is still returned so callers needing the raw
    /// date (e.g. to warn a user their tier is about to lapse) can read it.
    async fn resolve_identity(
        &self,
        platform_ids: &[PlatformId],
    ) -> Result<HashMap<PlatformId, (Option<ChatId>, u32, Option<chrono::NaiveDate>)>>;

    async fn set_entitlement(&self, chat_id: ChatId, level: u32, expiry: Option<chrono::NaiveDate>) -> Result<()>;

    async fn get_balance(&self, chat_id: ChatId) -> Result<i64>;

    /// `delta` may be negative. Fails with [`ops_api::Error::InsufficientFunds`]
    /// if the result would go below zero. Implemented as a single conditional
    /// `UPDATE`, never read-then-write.
    async fn add_balance(&self, chat_id: ChatId, delta: i64) -> Result<i64>;

    async fn create_listing(
        &self,
        seller_chat_id: ChatId,
        item_template_id: i64,
        dna: &ItemDna,
        price: u32,
    ) -> Result<i64>;

    async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>>;

    /// Most recent active listings, newest first.
    async fn list_active_listings(&self, limit: u32) -> Result<Vec<Listing>>;

    /// In one transaction: assert listing active, assert buyer != seller,
    /// atomically debit buyer, credit seller, mark listing sold. Any
    /// failure rolls back the whole transaction.
    async fn execute_purchase(&self, buyer_chat_id: ChatId, listing_id: i64) -> Result<Listing>;

    /// Reverse an `execute_purchase` whose subsequent RCON spawn failed: in
    /// one transaction, refund the buyer, claw back the seller's credit,
    /// and reactivate the listing. Safe only because the spawn step never
    /// ran, so no item was created.
    async fn compensate_purchase(&self, listing_id: i64, buyer_chat_id: ChatId, price: u32, seller_chat_id: ChatId) -> Result<()>;

    /// Debit + insert a PENDING row in one transaction. Returns `None` if
    /// the debit would be insufficient.
    async fn open_withdrawal(
        &self,
        chat_id: ChatId,
        amount: u32,
        character_name: &str,
        server_name: &str,
    ) -> Result<Option<i64>>;

    async fn close_withdrawal(&self, tx_id: i64, status: WithdrawalStatus) -> Result<()>;

    async fn log_market_action(&self, chat_id: ChatId, action: &str, details: &str) -> Result<()>;

    async fn get_home(&self, platform_id: &str, server_name: &str) -> Result<Option<PlayerHome>>;

    async fn set_home(&self, platform_id: &str, server_name: &str, home: PlayerHome) -> Result<()>;

    async fn bump_playtime(&self, platform_id: &str, server_name: &str, minutes: u64) -> Result<()>;

    async fn get_playtime(&self, platform_id: &str, server_name: &str) -> Result<(u64, u64)>;

    async fn set_last_reward_playtime(&self, platform_id: &str, server_name: &str, value: u64) -> Result<()>;
}

/// Read-only reader over a single per-server game database. All failures
/// are a transient [`ops_api::Error::DbUnavailable`]; callers fall back to
/// a cache so the caller remains operational mid-write.
#[async_trait]
pub trait GameDbReaderT: Send + Sync {
    async fn batch_levels(&self, char_names: &[String]) -> Result<HashMap<String, u32>>;

    async fn batch_platform_ids(&self, char_names: &[String]) -> Result<HashMap<String, PlatformId>>;

    /// Each online character's in-game guild id, for grouping into rosters.
    /// A character with no guild is absent from the result.
    async fn batch_guild_ids(&self, char_names: &[String]) -> Result<HashMap<String, i64>>;

    async fn char_id_by_name(&self, char_name: &str) -> Result<Option<i64>>;

    async fn read_inventory_item(
        &self,
        owner_id: i64,
        slot: i64,
        inv_type: i32,
    ) -> Result<Option<(i64, Vec<u8>)>>;

    /// Rows currently at `template_id` for `owner_id`, across all inventory
    /// types, as `(inv_type, slot)` pairs. Used to snapshot the buyer's
    /// "before" set and to poll for the newly-spawned item.
    async fn inventory_rows_for_template(
        &self,
        owner_id: i64,
        template_id: i64,
    ) -> Result<Vec<(i32, i64)>>;

    /// Given opaque owner ids from a building-pieces query, resolve each to
    /// either a guild or a character and collect member platform ids.
    async fn resolve_owners(&self, owner_ids: &[i64]) -> Result<HashMap<i64, Vec<PlatformId>>>;
}

/// The only way to mutate in-game state. See `ops-rcon` for the
/// implementation; this trait is the seam the marketplace and status
/// components depend on so they can be driven by a mock transport in tests.
#[async_trait]
pub trait RconPoolT: Send + Sync {
    async fn raw(&self, server: &str, cmd: &str, retries: u32) -> Result<String>;

    async fn list_players(&self, server: &str, cache_ok: bool) -> Result<String>;

    /// Resolve `char_name`'s session index, render `cmd_template(index)`,
    /// sanitize, submit with zero internal retries, and loop-retry (up to 3
    /// times total) the whole resolve+submit on transport failure.
    async fn safe(
        &self,
        server: &str,
        char_name: &str,
        cmd_template: &(dyn Fn(u32) -> String + Send + Sync),
    ) -> Result<String>;

    /// Same resolution, then issues every template against the same
    /// resolved index; any single failure restarts the entire batch.
    async fn safe_batch(
        &self,
        server: &str,
        char_name: &str,
        cmd_templates: &[Box<dyn Fn(u32) -> String + Send + Sync>],
    ) -> Result<Vec<String>>;
}

/// External collaborator boundary: message send, user fetch, role
/// add/remove, channel edit. Specified at the interface only — no chat
/// service integration lives in this workspace; it exists so `ops-status`
/// and `ops-marketplace` can depend on *something* without owning chat I/O.
#[async_trait]
pub trait ChatTransportT: Send + Sync {
    async fn dm(&self, chat_id: ChatId, message: &str) -> Result<()>;
}

/// A self-contained unit of recurring background work: a status tick, a
/// per-file log tailer, a reward sweep. The supervisor in `ops-server`
/// drives every job the same way, so one retry/backoff policy covers all
/// of them rather than each growing its own ad-hoc loop.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Used only for logging; need not be unique.
    fn name(&self) -> &str;

    fn interval(&self) -> std::time::Duration;

    /// One iteration of the job's work. Errors are logged by the
    /// supervisor and do not stop the job; the next tick still fires on
    /// schedule.
    async fn tick(&self) -> Result<()>;
}
