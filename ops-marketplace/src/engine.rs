use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ops_api::{Error, Result};
use ops_core::{
    ChatId, ChatTransportT, GameDbReaderT, ListingStatus, RconPoolT, RegistryStoreT,
    PROP_ID_SELL_MARK, PROP_ID_STACK_QTY,
};
use rand::Rng;
use tracing::{info, warn};

use crate::blob;
use crate::locks::ChatLocks;

const INV_TYPE_BACKPACK: i32 = 0;
const INV_TYPE_HOTBAR: i32 = 2;

/// Defaults tuned for production server round-trip latency; tests register
/// a `ServerContext` with much shorter values so the polling loops below
/// don't block a test suite for tens of seconds.
pub const DEFAULT_SELL_VERIFY_DELAY: Duration = Duration::from_millis(800);
pub const DEFAULT_BUY_POLL_ATTEMPTS: u32 = 4;
pub const DEFAULT_BUY_POLL_INTERVAL: Duration = Duration::from_secs(3);

struct ServerContext {
    game_db: Arc<dyn GameDbReaderT>,
    currency_item_id: i64,
    sync_wait: Duration,
    sell_verify_delay: Duration,
    buy_poll_attempts: u32,
    buy_poll_interval: Duration,
}

/// Composes the registry (authoritative money), a per-server read-only game
/// DB (authoritative item state), and the RCON pool (the only way to mutate
/// items) into the deposit/withdraw/sell/buy flows. One safety-critical
/// flow at a time per entry point, guarded by a per-chat-id lock.
pub struct MarketplaceEngine {
    registry: Arc<dyn RegistryStoreT>,
    rcon: Arc<dyn RconPoolT>,
    chat: Arc<dyn ChatTransportT>,
    servers: HashMap<String, ServerContext>,
    locks: ChatLocks,
}

impl MarketplaceEngine {
    pub fn new(
        registry: Arc<dyn RegistryStoreT>,
        rcon: Arc<dyn RconPoolT>,
        chat: Arc<dyn ChatTransportT>,
    ) -> Self {
        Self {
            registry,
            rcon,
            chat,
            servers: HashMap::new(),
            locks: ChatLocks::new(),
        }
    }

    pub fn register_server(
        &mut self,
        name: impl Into<String>,
        game_db: Arc<dyn GameDbReaderT>,
        currency_item_id: i64,
        sync_wait: Duration,
    ) {
        self.register_server_tuned(
            name,
            game_db,
            currency_item_id,
            sync_wait,
            DEFAULT_SELL_VERIFY_DELAY,
            DEFAULT_BUY_POLL_ATTEMPTS,
            DEFAULT_BUY_POLL_INTERVAL,
        );
    }

    /// As [`Self::register_server`], but with the sell-verify delay and
    /// buy-poll cadence overridden. Production wiring should use
    /// `register_server`; tests use this to keep the polling loops below
    /// from blocking on real-world latencies tuned for a live server.
    pub fn register_server_tuned(
        &mut self,
        name: impl Into<String>,
        game_db: Arc<dyn GameDbReaderT>,
        currency_item_id: i64,
        sync_wait: Duration,
        sell_verify_delay: Duration,
        buy_poll_attempts: u32,
        buy_poll_interval: Duration,
    ) {
        self.servers.insert(
            name.into(),
            ServerContext {
                game_db,
                currency_item_id,
                sync_wait,
                sell_verify_delay,
                buy_poll_attempts,
                buy_poll_interval,
            },
        );
    }

    fn context(&self, server: &str) -> Result<&ServerContext> {
        self.servers
            .get(server)
            .ok_or_else(|| Error::Config(format!("unknown server: {server}")))
    }

    /// Resolve a speaker's chat id the same way every flow below does:
    /// live character name -> platform id -> bound identity. Exposed for
    /// `ops-server`'s command adapter, which needs the same resolution for
    /// commands this crate doesn't own (`!balance`, `!market`, `!warp`).
    pub async fn resolve_speaker(&self, server: &str, char_name: &str) -> Result<Option<ChatId>> {
        let ctx = self.context(server)?;
        self.resolve_chat_id(ctx, char_name).await
    }

    pub fn chat(&self) -> &Arc<dyn ChatTransportT> {
        &self.chat
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStoreT> {
        &self.registry
    }

    async fn resolve_chat_id(&self, ctx: &ServerContext, char_name: &str) -> Result<Option<ChatId>> {
        let pids = ctx.game_db.batch_platform_ids(&[char_name.to_string()]).await?;
        let Some(platform_id) = pids.get(char_name) else {
            return Ok(None);
        };
        let resolved = self.registry.resolve_identity(std::slice::from_ref(platform_id)).await?;
        Ok(resolved.get(platform_id).and_then(|(chat_id, ..)| *chat_id))
    }

    /// Deposit flow: resolve speaker, lock, zero the slot in-game, credit
    /// the wallet. Expected-failure branches (unregistered speaker, wrong
    /// item, empty stack) are informative no-ops, not propagated errors;
    /// only a genuine I/O fault propagates.
    pub async fn deposit(&self, server: &str, char_name: &str, slot: i64) -> Result<()> {
        let ctx = self.context(server)?;
        let Some(chat_id) = self.resolve_chat_id(ctx, char_name).await? else {
            return Ok(());
        };
        let lock = self.locks.lock_for(chat_id);
        let _guard = lock.lock().await;

        self.chat.dm(chat_id, "Processing your deposit...").await.ok();
        tokio::time::sleep(ctx.sync_wait).await;

        let Some(char_id) = ctx.game_db.char_id_by_name(char_name).await? else {
            self.chat.dm(chat_id, "Couldn't find your character online.").await.ok();
            return Ok(());
        };
        let Some((template_id, blob)) = ctx
            .game_db
            .read_inventory_item(char_id, slot, INV_TYPE_BACKPACK)
            .await?
        else {
            self.chat.dm(chat_id, "That slot is empty.").await.ok();
            return Ok(());
        };
        if template_id != ctx.currency_item_id {
            self.chat.dm(chat_id, "That slot isn't the currency item.").await.ok();
            return Ok(());
        }
        let quantity = blob::int_stat(&blob, PROP_ID_STACK_QTY)?.unwrap_or(0);
        if quantity == 0 {
            self.chat.dm(chat_id, "That stack is empty.").await.ok();
            return Ok(());
        }

        self.rcon
            .safe(server, char_name, &move |idx| {
                format!("con {idx} SetInventoryItemIntStat {slot} {PROP_ID_STACK_QTY} 0 {INV_TYPE_BACKPACK}")
            })
            .await?;

        let new_balance = self.registry.add_balance(chat_id, quantity as i64).await?;
        self.registry
            .log_market_action(chat_id, "DEPOSIT", &format!("{quantity} of item {template_id}"))
            .await
            .ok();
        self.chat
            .dm(chat_id, &format!("Deposited {quantity}. New balance: {new_balance}"))
            .await
            .ok();
        Ok(())
    }

    /// Strict two-phase withdrawal. A failed RCON spawn closes the ledger
    /// row as `ERROR_REVIEW` rather than auto-refunding: the item may
    /// already have spawned, so a naive refund would duplicate currency.
    pub async fn withdraw(&self, server: &str, char_name: &str, amount: u32) -> Result<()> {
        let ctx = self.context(server)?;
        let Some(chat_id) = self.resolve_chat_id(ctx, char_name).await? else {
            return Ok(());
        };
        if !(1..=65535).contains(&amount) {
            self.chat.dm(chat_id, "Withdrawal amount must be between 1 and 65535.").await.ok();
            return Ok(());
        }

        let Some(tx_id) = self
            .registry
            .open_withdrawal(chat_id, amount, char_name, server)
            .await?
        else {
            self.chat.dm(chat_id, "Insufficient balance.").await.ok();
            return Ok(());
        };

        let currency_item_id = ctx.currency_item_id;
        match self
            .rcon
            .safe(server, char_name, &move |idx| {
                format!("con {idx} SpawnItem {currency_item_id} {amount}")
            })
            .await
        {
            Ok(_) => {
                self.registry
                    .close_withdrawal(tx_id, ops_core::WithdrawalStatus::Completed)
                    .await?;
                self.chat
                    .dm(chat_id, &format!("Withdrew {amount}. Transaction #{tx_id} complete."))
                    .await
                    .ok();
            }
            Err(e) => {
                self.registry
                    .close_withdrawal(tx_id, ops_core::WithdrawalStatus::ErrorReview)
                    .await
                    .ok();
                warn!(tx_id, "withdrawal rcon step failed: {e}");
                self.chat
                    .dm(
                        chat_id,
                        &format!("Transaction #{tx_id} is pending manual review; no funds were auto-refunded."),
                    )
                    .await
                    .ok();
            }
        }
        Ok(())
    }

    /// Mark-verify-delete sell protocol. Returns the new listing id on
    /// success; `None` on any expected-failure abort (no inventory change
    /// in that case).
    pub async fn sell(&self, server: &str, char_name: &str, slot: i64, price: u32) -> Result<Option<i64>> {
        let ctx = self.context(server)?;
        let Some(chat_id) = self.resolve_chat_id(ctx, char_name).await? else {
            return Ok(None);
        };
        if !(1..=65535).contains(&price) {
            self.chat.dm(chat_id, "Price must be between 1 and 65535.").await.ok();
            return Ok(None);
        }

        let lock = self.locks.lock_for(chat_id);
        let _guard = lock.lock().await;

        tokio::time::sleep(ctx.sync_wait).await;
        let Some(char_id) = ctx.game_db.char_id_by_name(char_name).await? else {
            self.chat.dm(chat_id, "Couldn't find your character online.").await.ok();
            return Ok(None);
        };
        let Some((template_pre, _)) = ctx
            .game_db
            .read_inventory_item(char_id, slot, INV_TYPE_BACKPACK)
            .await?
        else {
            self.chat.dm(chat_id, "That slot is empty.").await.ok();
            return Ok(None);
        };

        let mark: u32 = rand::thread_rng().gen();
        self.rcon
            .safe(server, char_name, &move |idx| {
                format!("con {idx} SetInventoryItemIntStat {slot} {PROP_ID_SELL_MARK} {mark} {INV_TYPE_BACKPACK}")
            })
            .await?;

        tokio::time::sleep(ctx.sell_verify_delay).await;
        let Some((template_post, blob_post)) = ctx
            .game_db
            .read_inventory_item(char_id, slot, INV_TYPE_BACKPACK)
            .await?
        else {
            self.chat.dm(chat_id, "Listing aborted: item vanished during verification.").await.ok();
            return Ok(None);
        };
        let mark_seen = blob::int_stat(&blob_post, PROP_ID_SELL_MARK)?;
        if template_post != template_pre || mark_seen != Some(mark) {
            warn!(char_name, slot, "sell aborted: item swap detected during mark-verify window");
            self.chat
                .dm(chat_id, "Listing aborted: the item at that slot changed mid-verification.")
                .await
                .ok();
            return Ok(None);
        }

        let mut dna = blob::decode_dna(&blob_post)?;
        dna.int_stats.remove(&PROP_ID_SELL_MARK);

        self.rcon
            .safe(server, char_name, &move |idx| {
                format!("con {idx} SetInventoryItemIntStat {slot} {PROP_ID_STACK_QTY} 0 {INV_TYPE_BACKPACK}")
            })
            .await?;

        let listing_id = self.registry.create_listing(chat_id, template_pre, &dna, price).await?;
        self.registry
            .log_market_action(chat_id, "SELL", &format!("listing {listing_id}, item {template_pre}, price {price}"))
            .await
            .ok();
        self.chat
            .dm(chat_id, &format!("Listed item {template_pre} for {price} (listing #{listing_id})."))
            .await
            .ok();
        Ok(Some(listing_id))
    }

    /// Atomic debit+credit+spawn+DNA-inject buy flow. On a failed spawn,
    /// compensates the registry mutation in one transaction (safe because
    /// the spawn failed before any item existed).
    pub async fn buy(&self, server: &str, char_name: &str, listing_id: i64) -> Result<()> {
        let ctx = self.context(server)?;
        let Some(chat_id) = self.resolve_chat_id(ctx, char_name).await? else {
            return Ok(());
        };

        let listing = match self.registry.get_listing(listing_id).await? {
            Some(l) if l.status == ListingStatus::Active => l,
            _ => {
                self.chat.dm(chat_id, "That listing is no longer active.").await.ok();
                return Ok(());
            }
        };
        if listing.seller_chat_id == chat_id {
            self.chat.dm(chat_id, "You can't buy your own listing.").await.ok();
            return Ok(());
        }

        let lock = self.locks.lock_for(chat_id);
        let _guard = lock.lock().await;

        let Some(char_id) = ctx.game_db.char_id_by_name(char_name).await? else {
            self.chat.dm(chat_id, "Couldn't find your character online.").await.ok();
            return Ok(());
        };

        let before = ctx
            .game_db
            .inventory_rows_for_template(char_id, listing.item_template_id)
            .await?;
        if before
            .iter()
            .any(|(inv_type, _)| *inv_type == INV_TYPE_BACKPACK || *inv_type == INV_TYPE_HOTBAR)
        {
            self.chat
                .dm(chat_id, "Store your existing copy of this item before buying another.")
                .await
                .ok();
            return Err(Error::StackCollision);
        }

        let listing = match self.registry.execute_purchase(chat_id, listing_id).await {
            Ok(l) => l,
            Err(Error::InsufficientFunds) => {
                self.chat.dm(chat_id, "You don't have enough balance for this listing.").await.ok();
                return Ok(());
            }
            Err(Error::ListingNotActive) => {
                self.chat.dm(chat_id, "Someone bought that listing first.").await.ok();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let template_id = listing.item_template_id;
        let spawn_result = self
            .rcon
            .safe(server, char_name, &move |idx| format!("con {idx} SpawnItem {template_id} 1"))
            .await;

        if let Err(e) = spawn_result {
            self.registry
                .compensate_purchase(listing_id, chat_id, listing.price, listing.seller_chat_id)
                .await?;
            warn!(listing_id, "buy spawn failed, compensated: {e}");
            self.chat
                .dm(chat_id, "Purchase failed before the item spawned; you've been refunded.")
                .await
                .ok();
            return Err(e);
        }

        let mut fresh_row = None;
        let mut last_after = Vec::new();
        for _ in 0..ctx.buy_poll_attempts {
            tokio::time::sleep(ctx.buy_poll_interval).await;
            let after = ctx
                .game_db
                .inventory_rows_for_template(char_id, listing.item_template_id)
                .await?;
            if let Some(row) = after.iter().find(|r| !before.contains(r)).copied() {
                fresh_row = Some(row);
                break;
            }
            last_after = after;
        }

        let (inv_type, new_slot) = match fresh_row.or_else(|| last_after.first().copied()) {
            None => {
                self.chat
                    .dm(
                        chat_id,
                        &format!("Item spawned but couldn't be located automatically (listing #{listing_id}); contact an admin."),
                    )
                    .await
                    .ok();
                return Ok(());
            }
            Some(row) if fresh_row.is_none() => {
                warn!(listing_id, "buy located item via any-row fallback, skipping DNA injection");
                self.chat
                    .dm(
                        chat_id,
                        "Item spawned; its exact stats could not be safely applied (it matched an existing stack). Contact an admin if it looks wrong.",
                    )
                    .await
                    .ok();
                return Ok(());
            }
            Some(row) => row,
        };

        let mut templates: Vec<Box<dyn Fn(u32) -> String + Send + Sync>> = Vec::new();
        for (&prop_id, &value) in &listing.item_dna.int_stats {
            templates.push(Box::new(move |idx| {
                format!("con {idx} SetInventoryItemIntStat {new_slot} {prop_id} {value} {inv_type}")
            }));
        }
        for (&prop_id, &value) in &listing.item_dna.float_stats {
            let value = value.0;
            templates.push(Box::new(move |idx| {
                format!("con {idx} SetInventoryItemFloatStat {new_slot} {prop_id} {value} {inv_type}")
            }));
        }
        if !templates.is_empty() {
            self.rcon.safe_batch(server, char_name, &templates).await?;
        }

        self.registry
            .log_market_action(chat_id, "BUY", &format!("listing {listing_id}"))
            .await
            .ok();
        self.chat.dm(chat_id, &format!("Purchased listing #{listing_id}.")).await.ok();
        info!(listing_id, chat_id, "buy completed");
        Ok(())
    }
}
