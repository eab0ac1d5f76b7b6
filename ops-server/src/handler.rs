use std::sync::Arc;

use async_trait::async_trait;
use ops_api::Result;
use ops_marketplace::MarketplaceEngine;
use ops_router::CommandHandlerT;
use ops_status::RegistrationDesk;
use tracing::warn;

const MARKET_HELP: &str = "Commands: !deposit <slot>, !sell <slot> <price>, !buy <listing>, \
!withdraw <amount>, !balance, !market, !register <code>";

/// Bridges the router's recognized commands to the components that own
/// them: deposit/sell/buy/withdraw to the marketplace engine, balance/market
/// to the registry directly, register to the registration desk. `!warp` has
/// no implementation in this workspace and only acknowledges the command.
pub struct OpsCommandHandler {
    marketplace: Arc<MarketplaceEngine>,
    desk: Arc<RegistrationDesk>,
}

impl OpsCommandHandler {
    pub fn new(marketplace: Arc<MarketplaceEngine>, desk: Arc<RegistrationDesk>) -> Self {
        Self { marketplace, desk }
    }
}

#[async_trait]
impl CommandHandlerT for OpsCommandHandler {
    async fn deposit(&self, server: &str, char_name: &str, slot: i64) -> Result<()> {
        self.marketplace.deposit(server, char_name, slot).await
    }

    async fn sell(&self, server: &str, char_name: &str, slot: i64, price: u32) -> Result<()> {
        self.marketplace.sell(server, char_name, slot, price).await.map(|_| ())
    }

    async fn buy(&self, server: &str, char_name: &str, listing_id: i64) -> Result<()> {
        self.marketplace.buy(server, char_name, listing_id).await
    }

    async fn withdraw(&self, server: &str, char_name: &str, amount: u32) -> Result<()> {
        self.marketplace.withdraw(server, char_name, amount).await
    }

    async fn balance(&self, server: &str, char_name: &str) -> Result<()> {
        let Some(chat_id) = self.marketplace.resolve_speaker(server, char_name).await? else {
            return Ok(());
        };
        let balance = self.marketplace.registry().get_balance(chat_id).await?;
        self.marketplace.chat().dm(chat_id, &format!("Balance: {balance}")).await.ok();
        Ok(())
    }

    async fn market_help(&self, server: &str, char_name: &str) -> Result<()> {
        let Some(chat_id) = self.marketplace.resolve_speaker(server, char_name).await? else {
            return Ok(());
        };
        self.marketplace.chat().dm(chat_id, MARKET_HELP).await.ok();
        Ok(())
    }

    async fn market(&self, server: &str, char_name: &str) -> Result<()> {
        let Some(chat_id) = self.marketplace.resolve_speaker(server, char_name).await? else {
            return Ok(());
        };
        let listings = self.marketplace.registry().list_active_listings(10).await?;
        if listings.is_empty() {
            self.marketplace.chat().dm(chat_id, "No active listings.").await.ok();
            return Ok(());
        }
        let mut body = String::from("Active listings:\n");
        for listing in listings {
            body.push_str(&format!(
                "#{} item {} — {}\n",
                listing.listing_id, listing.item_template_id, listing.price
            ));
        }
        self.marketplace.chat().dm(chat_id, &body).await.ok();
        Ok(())
    }

    async fn warp(&self, server: &str, char_name: &str, name: &str) -> Result<()> {
        let Some(chat_id) = self.marketplace.resolve_speaker(server, char_name).await? else {
            return Ok(());
        };
        warn!(server, char_name, name, "warp requested but not implemented");
        self.marketplace
            .chat()
            .dm(chat_id, "Warp isn't available on this deployment.")
            .await
            .ok();
        Ok(())
    }

    async fn register(&self, _server: &str, char_name: &str, code: &str) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        if !self.desk.observe_code(code, char_name, now).await {
            warn!(char_name, code, "register command used an unknown or expired code");
        }
        Ok(())
    }
}
