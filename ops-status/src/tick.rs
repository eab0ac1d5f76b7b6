use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ops_api::Result;
use ops_core::{ChatTransportT, EventFrame, GameDbReaderT, PeriodicJob, PlayerRow, RconPoolT, RegistryStoreT};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::desk::RegistrationDesk;

const STATUS_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// One server's inputs for the presence loop.
pub struct StatusServer {
    pub name: String,
    pub game_db: Arc<dyn GameDbReaderT>,
}

/// Polls `ListPlayers` for every configured server, enriches the roster,
/// publishes [`EventFrame::PlayersUpdated`], and drives the registration
/// handshake's third step. Rendering a presence message and writing the
/// JSON snapshot are out of scope here — this only produces the event the
/// rest of the process reacts to.
pub struct StatusTick {
    rcon: Arc<dyn RconPoolT>,
    registry: Arc<dyn RegistryStoreT>,
    chat: Arc<dyn ChatTransportT>,
    desk: Arc<RegistrationDesk>,
    servers: Vec<StatusServer>,
    events: broadcast::Sender<EventFrame>,
    level_cache: Mutex<HashMap<String, HashMap<String, u32>>>,
}

impl StatusTick {
    pub fn new(
        rcon: Arc<dyn RconPoolT>,
        registry: Arc<dyn RegistryStoreT>,
        chat: Arc<dyn ChatTransportT>,
        desk: Arc<RegistrationDesk>,
        servers: Vec<StatusServer>,
        events: broadcast::Sender<EventFrame>,
    ) -> Self {
        Self {
            rcon,
            registry,
            chat,
            desk,
            servers,
            events,
            level_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.events.subscribe()
    }

    async fn tick_server(&self, server: &StatusServer) -> Result<()> {
        let body = self.rcon.list_players(&server.name, true).await?;
        let players = parse_player_rows(&body);

        let char_names: Vec<String> = players.iter().map(|p| p.char_name.clone()).collect();
        let levels = match server.game_db.batch_levels(&char_names).await {
            Ok(levels) => {
                self.level_cache.lock().await.insert(server.name.clone(), levels.clone());
                levels
            }
            Err(e) => {
                warn!(server = %server.name, "level lookup failed, falling back to cache: {e}");
                self.level_cache.lock().await.get(&server.name).cloned().unwrap_or_default()
            }
        };

        let platform_ids: Vec<String> = players.iter().map(|p| p.platform_id.clone()).collect();
        let resolved = self.registry.resolve_identity(&platform_ids).await?;
        let identities: HashMap<String, Option<i64>> =
            resolved.iter().map(|(pid, (chat_id, ..))| (pid.clone(), *chat_id)).collect();

        let _ = self.events.send(EventFrame::PlayersUpdated {
            server_name: server.name.clone(),
            players: players.clone(),
            levels,
            identities,
        });

        self.resolve_registrations(&players).await?;
        Ok(())
    }

    async fn resolve_registrations(&self, players: &[PlayerRow]) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        self.desk.sweep_expired(now).await;

        let online: HashMap<String, String> =
            players.iter().map(|p| (p.char_name.clone(), p.platform_id.clone())).collect();

        for (chat_id, platform_id, char_name) in self.desk.resolve_ready(&online).await {
            self.registry.bind_identity(&platform_id, chat_id).await?;
            info!(chat_id, char_name = %char_name, "registration completed");
            let _ = self
                .chat
                .dm(chat_id, &format!("Registered as {char_name}."))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for StatusTick {
    fn name(&self) -> &str {
        "status-tick"
    }

    fn interval(&self) -> std::time::Duration {
        STATUS_TICK_INTERVAL
    }

    async fn tick(&self) -> Result<()> {
        for server in &self.servers {
            if let Err(e) = self.tick_server(server).await {
                warn!(server = %server.name, "status tick failed: {e}");
            }
        }
        Ok(())
    }
}

/// Parse a `ListPlayers` response body into rows: header line, then
/// pipe-delimited `session_idx | char_name | ... | platform_id`. Tolerant
/// of leading whitespace, blank lines, and short rows (skipped).
fn parse_player_rows(body: &str) -> Vec<PlayerRow> {
    body.lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let fields: Vec<&str> = line.split('|').map(|f| f.trim()).collect();
            if fields.len() < 5 {
                return None;
            }
            let session_idx = fields[0].parse().ok()?;
            Some(PlayerRow {
                session_idx,
                char_name: fields[1].to_string(),
                platform_id: fields[4].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_skips_blank_and_short_lines() {
        let body = "idx|name|a|b|platform\n 0 | Alice | - | - | steam:alice \n\n1|Bob|-|-|steam:bob\nbad|row\n";
        let rows = parse_player_rows(body);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_idx, 0);
        assert_eq!(rows[0].char_name, "Alice");
        assert_eq!(rows[0].platform_id, "steam:alice");
        assert_eq!(rows[1].char_name, "Bob");
    }

    use async_trait::async_trait;
    use ops_core::{ChatId, RegistryStoreT};
    use ops_rcon::DummyRcon;
    use ops_registry::RegistryStore;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingChat {
        sent: StdMutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl ChatTransportT for RecordingChat {
        async fn dm(&self, chat_id: ChatId, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, message.to_string()));
            Ok(())
        }
    }

    fn empty_game_db(path: &str) -> Arc<dyn GameDbReaderT> {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE characters (id INTEGER PRIMARY KEY, char_name TEXT, playerId INTEGER, guild INTEGER, level INTEGER);",
        )
        .unwrap();
        Arc::new(ops_gamedb::GameDbReader::try_new(path).unwrap())
    }

    #[tokio::test]
    async fn tick_publishes_players_updated_and_completes_a_pending_registration() {
        let path = std::env::temp_dir()
            .join(format!(
                "ops-status-tick-{}.db",
                std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
            ))
            .to_str()
            .unwrap()
            .to_string();

        let rcon = Arc::new(DummyRcon::new());
        rcon.set_online("srv1", vec![(0, "Alice".into())]);
        let registry = Arc::new(RegistryStore::try_new_mem().unwrap());
        let chat = Arc::new(RecordingChat::default());
        let desk = Arc::new(RegistrationDesk::new());

        let now = chrono::Utc::now().naive_utc();
        desk.mint(99, now, "XYZ999".into()).await;
        assert!(desk.observe_code("XYZ999", "Alice", now).await);

        let (tx, mut rx) = broadcast::channel(16);
        let status = StatusTick::new(
            rcon,
            registry.clone(),
            chat.clone(),
            desk,
            vec![StatusServer {
                name: "srv1".into(),
                game_db: empty_game_db(&path),
            }],
            tx,
        );

        status.tick().await.unwrap();

        let EventFrame::PlayersUpdated { server_name, players, .. } = rx.recv().await.unwrap() else {
            panic!("expected PlayersUpdated");
        };
        assert_eq!(server_name, "srv1");
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].char_name, "Alice");

        let (chat_id, level, expiry) = registry.resolve_identity(&["steam:Alice".to_string()]).await.unwrap()["steam:Alice"];
        assert_eq!(chat_id, Some(99));
        assert_eq!(level, 0);
        assert_eq!(expiry, None);
        assert!(chat.sent.lock().unwrap().iter().any(|(c, _)| *c == 99));

        std::fs::remove_file(&path).ok();
    }
}
