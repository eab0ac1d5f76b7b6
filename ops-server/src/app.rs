use std::collections::HashMap;
use std::sync::Arc;

use ops_api::{Error, Result};
use ops_core::{ChatTransportT, GameDbReaderT, PeriodicJob, RegistryStoreT};
use ops_gamedb::GameDbReader;
use ops_marketplace::MarketplaceEngine;
use ops_rcon::RconPool;
use ops_registry::RegistryStore;
use ops_router::CommandRouter;
use ops_status::{GuildSyncConsumer, RegistrationDesk, RewardConsumer, RewardProfile, StatusServer, StatusTick};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::chat::LoggingChat;
use crate::config::Config;
use crate::handler::OpsCommandHandler;
use crate::supervisor::{run_consumer, run_periodic, EventConsumerT, LogTailerJob};

/// Assembles every component from a validated [`Config`] and runs until a
/// shutdown signal fires: one place that owns every `Arc`-shared dependency
/// and hands out references to the pieces that need them.
pub async fn run(config: Config, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let profiles = config.server_profiles();
    let rcon = Arc::new(RconPool::new(&profiles));
    let registry: Arc<dyn RegistryStoreT> = Arc::new(RegistryStore::try_new(&config.registry_db_path)?);
    let chat: Arc<dyn ChatTransportT> = Arc::new(LoggingChat);

    let mut game_dbs: HashMap<String, Arc<dyn GameDbReaderT>> = HashMap::new();
    for server in &config.servers {
        let reader: Arc<dyn GameDbReaderT> = Arc::new(GameDbReader::try_new(&server.db_path)?);
        game_dbs.insert(server.name.clone(), reader);
    }

    let mut marketplace = MarketplaceEngine::new(registry.clone(), rcon.clone(), chat.clone());
    for (profile, server) in profiles.iter().zip(&config.servers) {
        let game_db = game_dbs
            .get(&server.name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no game db wired for {}", server.name)))?;
        marketplace.register_server(&profile.name, game_db, profile.currency_item_id, profile.sync_wait);
    }
    let marketplace = Arc::new(marketplace);

    let desk = Arc::new(RegistrationDesk::new());
    let handler = Arc::new(OpsCommandHandler::new(marketplace.clone(), desk.clone()));
    let router = Arc::new(CommandRouter::new(handler));

    let (events_tx, _) = broadcast::channel(256);
    let status_servers: Vec<StatusServer> = config
        .servers
        .iter()
        .map(|s| StatusServer {
            name: s.name.clone(),
            game_db: game_dbs[&s.name].clone(),
        })
        .collect();
    let status_tick = Arc::new(StatusTick::new(
        rcon.clone(),
        registry.clone(),
        chat.clone(),
        desk,
        status_servers,
        events_tx.clone(),
    ));

    let reward_profiles: Vec<RewardProfile> = profiles
        .iter()
        .map(|p| RewardProfile {
            server_name: p.name.clone(),
            enabled: p.reward_enabled,
            intervals: p.reward_intervals.clone(),
            item_id: p.reward_item_id,
            quantity: p.reward_quantity,
        })
        .collect();
    let reward_consumer: Arc<dyn EventConsumerT> = Arc::new(RewardConsumer::new(registry.clone(), rcon.clone(), reward_profiles));

    let mut jobs: Vec<Arc<dyn PeriodicJob>> = vec![status_tick.clone()];
    for server in &config.servers {
        jobs.push(Arc::new(LogTailerJob::new(
            server.name.clone(),
            server.log_path.clone(),
            router.clone(),
        )));
    }

    let mut handles = Vec::new();
    for job in jobs {
        handles.push(tokio::spawn(run_periodic(job, shutdown.clone())));
    }
    handles.push(tokio::spawn(run_consumer(
        reward_consumer,
        status_tick.subscribe(),
        shutdown.clone(),
    )));

    if config.guild_sync.enabled {
        let guild_sync: Arc<dyn EventConsumerT> = Arc::new(GuildSyncConsumer::new(game_dbs.clone(), events_tx.clone()));
        handles.push(tokio::spawn(run_consumer(guild_sync, status_tick.subscribe(), shutdown.clone())));
    }

    info!(servers = config.servers.len(), "operations plane running");
    shutdown.changed().await.ok();
    for handle in handles {
        handle.await.ok();
    }
    Ok(())
}
