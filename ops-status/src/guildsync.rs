use std::collections::HashMap;
use std::sync::Arc;

use ops_api::Result;
use ops_core::{EventFrame, GameDbReaderT};
use tokio::sync::broadcast;

/// Groups online characters by their in-game guild id and republishes the
/// roster as [`EventFrame::GuildRosterChanged`]. The chat-side role
/// reconciler that would consume this is out of scope here; this crate
/// only produces the event.
pub struct GuildSyncConsumer {
    game_dbs: HashMap<String, Arc<dyn GameDbReaderT>>,
    events: broadcast::Sender<EventFrame>,
}

impl GuildSyncConsumer {
    pub fn new(game_dbs: HashMap<String, Arc<dyn GameDbReaderT>>, events: broadcast::Sender<EventFrame>) -> Self {
        Self { game_dbs, events }
    }

    pub async fn handle(&self, frame: &EventFrame) -> Result<()> {
        let EventFrame::PlayersUpdated { server_name, players, .. } = frame else {
            return Ok(());
        };
        let Some(game_db) = self.game_dbs.get(server_name) else {
            return Ok(());
        };
        if players.is_empty() {
            return Ok(());
        }

        let char_names: Vec<String> = players.iter().map(|p| p.char_name.clone()).collect();
        let guild_ids = game_db.batch_guild_ids(&char_names).await?;

        let mut rosters: HashMap<i64, Vec<String>> = HashMap::new();
        for player in players {
            if let Some(guild_id) = guild_ids.get(&player.char_name) {
                rosters.entry(*guild_id).or_default().push(player.platform_id.clone());
            }
        }

        for (guild_id, platform_ids) in rosters {
            let _ = self.events.send(EventFrame::GuildRosterChanged { guild_id, platform_ids });
        }
        Ok(())
    }
}
