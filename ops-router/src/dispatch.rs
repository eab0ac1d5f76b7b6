use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ops_api::Result;
use tracing::{error, warn};

use crate::command::{parse_line, Command};

/// Business logic invoked once a line has matched a command and its
/// speaker. Implemented downstream (marketplace, registration, warp/trade
/// cogs) — this crate only owns recognition and fan-out.
#[async_trait]
pub trait CommandHandlerT: Send + Sync {
    async fn deposit(&self, server: &str, char_name: &str, slot: i64) -> Result<()>;
    async fn sell(&self, server: &str, char_name: &str, slot: i64, price: u32) -> Result<()>;
    async fn buy(&self, server: &str, char_name: &str, listing_id: i64) -> Result<()>;
    async fn withdraw(&self, server: &str, char_name: &str, amount: u32) -> Result<()>;
    async fn balance(&self, server: &str, char_name: &str) -> Result<()>;
    async fn market_help(&self, server: &str, char_name: &str) -> Result<()>;
    async fn market(&self, server: &str, char_name: &str) -> Result<()>;
    async fn warp(&self, server: &str, char_name: &str, name: &str) -> Result<()>;
    async fn register(&self, server: &str, char_name: &str, code: &str) -> Result<()>;
}

const WARP_DEDUP_TTL: Duration = Duration::from_secs(60);

/// Recognizes commands on tailed lines and fans them out, one
/// `tokio::spawn`ed task per line, to a [`CommandHandlerT`]. `!warp` lines
/// are additionally deduplicated per `(speaker, destination, line hash)` for
/// [`WARP_DEDUP_TTL`] — the game echoes the triggering chat line on every
/// poll of a slow log, and a duplicate-fire would teleport the player twice.
/// Keying on the destination and a hash of the line, not just the speaker,
/// means two different `!warp` destinations issued back to back are both
/// honored; only a byte-identical repeat is suppressed.
pub struct CommandRouter<H: CommandHandlerT + 'static> {
    handler: Arc<H>,
    warp_seen: Mutex<HashMap<(String, String, u64), Instant>>,
}

impl<H: CommandHandlerT + 'static> CommandRouter<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            warp_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Parse `line` and, on a match, spawn a handler task. Returns `true`
    /// if a command was recognized (dispatched or suppressed as a duplicate).
    pub fn dispatch_line(&self, server: &str, line: &str) -> bool {
        let Some((speaker, command)) = parse_line(line) else {
            return false;
        };

        if let Command::Warp { name } = &command {
            if self.is_duplicate_warp(server, &speaker, name, line) {
                return true;
            }
        }

        let handler = self.handler.clone();
        let server = server.to_string();
        tokio::spawn(async move {
            let result = match command {
                Command::Deposit { slot } => handler.deposit(&server, &speaker, slot).await,
                Command::Sell { slot, price } => handler.sell(&server, &speaker, slot, price).await,
                Command::Buy { listing_id } => handler.buy(&server, &speaker, listing_id).await,
                Command::Withdraw { amount } => handler.withdraw(&server, &speaker, amount).await,
                Command::Balance => handler.balance(&server, &speaker).await,
                Command::MarketHelp => handler.market_help(&server, &speaker).await,
                Command::Market => handler.market(&server, &speaker).await,
                Command::Warp { name } => handler.warp(&server, &speaker, &name).await,
                Command::Register { code } => handler.register(&server, &speaker, &code).await,
            };
            if let Err(e) = result {
                error!(server = %server, speaker = %speaker, "command handler failed: {e}");
            }
        });
        true
    }

    fn is_duplicate_warp(&self, server: &str, char_name: &str, destination: &str, line: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        line.hash(&mut hasher);
        let line_hash = hasher.finish();

        let key = (char_name.to_string(), destination.to_string(), line_hash);
        let mut seen = self.warp_seen.lock().unwrap();
        seen.retain(|_, at| at.elapsed() < WARP_DEDUP_TTL);
        if seen.contains_key(&key) {
            warn!(server, char_name, destination, "suppressed duplicate !warp within dedup window");
            return true;
        }
        seen.insert(key, Instant::now());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingHandler {
        warps: AtomicU32,
        deposits: AtomicU32,
        notify: Notify,
    }

    #[async_trait]
    impl CommandHandlerT for CountingHandler {
        async fn deposit(&self, _server: &str, _char_name: &str, _slot: i64) -> Result<()> {
            self.deposits.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }
        async fn sell(&self, _: &str, _: &str, _: i64, _: u32) -> Result<()> {
            Ok(())
        }
        async fn buy(&self, _: &str, _: &str, _: i64) -> Result<()> {
            Ok(())
        }
        async fn withdraw(&self, _: &str, _: &str, _: u32) -> Result<()> {
            Ok(())
        }
        async fn balance(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn market_help(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn market(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn warp(&self, _server: &str, _char_name: &str, _name: &str) -> Result<()> {
            self.warps.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }
        async fn register(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unrecognized_line_is_not_dispatched() {
        let handler = Arc::new(CountingHandler::default());
        let router = CommandRouter::new(handler.clone());
        assert!(!router.dispatch_line("srv1", "just chatter, no command"));
    }

    #[tokio::test]
    async fn recognized_command_is_dispatched_to_handler() {
        let handler = Arc::new(CountingHandler::default());
        let router = CommandRouter::new(handler.clone());
        let line = "ChatWindow: Character Alice (uid 1): !deposit 3";
        assert!(router.dispatch_line("srv1", line));
        handler.notify.notified().await;
        assert_eq!(handler.deposits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_warp_within_window_is_suppressed() {
        let handler = Arc::new(CountingHandler::default());
        let router = CommandRouter::new(handler.clone());
        let line = "ChatWindow: Character Bob (uid 2): !warp home";
        router.dispatch_line("srv1", line);
        handler.notify.notified().await;
        router.dispatch_line("srv1", line);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.warps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_warp_destinations_are_both_dispatched() {
        let handler = Arc::new(CountingHandler::default());
        let router = CommandRouter::new(handler.clone());
        router.dispatch_line("srv1", "ChatWindow: Character Bob (uid 2): !warp home");
        handler.notify.notified().await;
        router.dispatch_line("srv1", "ChatWindow: Character Bob (uid 2): !warp arena");
        handler.notify.notified().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.warps.load(Ordering::SeqCst), 2);
    }
}
