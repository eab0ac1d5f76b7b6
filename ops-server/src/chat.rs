use async_trait::async_trait;
use ops_api::Result;
use ops_core::{ChatId, ChatTransportT};
use tracing::info;

/// Stand-in for a real chat transport (see `ops-core`'s `ChatTransportT`
/// doc comment — nothing in this workspace implements it against a live
/// service). Logs every DM instead of sending it, so the binary links and
/// runs end to end without a chat dependency.
pub struct LoggingChat;

#[async_trait]
impl ChatTransportT for LoggingChat {
    async fn dm(&self, chat_id: ChatId, message: &str) -> Result<()> {
        info!(chat_id, message, "dm (chat transport not wired)");
        Ok(())
    }
}
