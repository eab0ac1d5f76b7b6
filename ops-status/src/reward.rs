use std::collections::HashMap;
use std::sync::Arc;

use ops_api::Result;
use ops_core::{EventFrame, RconPoolT, RegistryStoreT, RewardIntervals};
use tracing::{info, warn};

/// Reward item/cadence for one server, resolved once from config at boot.
pub struct RewardProfile {
    pub server_name: String,
    pub enabled: bool,
    pub intervals: RewardIntervals,
    pub item_id: i64,
    pub quantity: u32,
}

fn interval_for(intervals: &RewardIntervals, level: u32) -> u64 {
    intervals.get(&level).copied().unwrap_or_else(|| intervals.get(&0).copied().unwrap_or(120))
}

/// Grants playtime rewards against `players-updated` events. Grounded in
/// the original's per-VIP-level reward cadence, re-expressed against the
/// registry's entitlement level: every online platform id accrues one
/// minute, and crossing its level's interval fires one RCON grant.
pub struct RewardConsumer {
    registry: Arc<dyn RegistryStoreT>,
    rcon: Arc<dyn RconPoolT>,
    profiles: HashMap<String, RewardProfile>,
}

impl RewardConsumer {
    pub fn new(registry: Arc<dyn RegistryStoreT>, rcon: Arc<dyn RconPoolT>, profiles: Vec<RewardProfile>) -> Self {
        Self {
            registry,
            rcon,
            profiles: profiles.into_iter().map(|p| (p.server_name.clone(), p)).collect(),
        }
    }

    /// Process one `PlayersUpdated` frame; a no-op for any other variant.
    pub async fn handle(&self, frame: &EventFrame) -> Result<()> {
        let EventFrame::PlayersUpdated { server_name, players, .. } = frame else {
            return Ok(());
        };

        let Some(profile) = self.profiles.get(server_name) else {
            return Ok(());
        };
        if !profile.enabled {
            return Ok(());
        }

        for player in players {
            self.registry.bump_playtime(&player.platform_id, server_name, 1).await?;
            let (online_minutes, last_reward_playtime) =
                self.registry.get_playtime(&player.platform_id, server_name).await?;

            let (_, level, _) = self
                .registry
                .resolve_identity(std::slice::from_ref(&player.platform_id))
                .await?
                .remove(&player.platform_id)
                .unwrap_or((None, 0, None));

            let interval = interval_for(&profile.intervals, level);
            if online_minutes < last_reward_playtime + interval {
                continue;
            }

            let item_id = profile.item_id;
            let quantity = profile.quantity;
            let command = move |idx: u32| format!("con {idx} SpawnItem {item_id} {quantity}");
            match self.rcon.safe(server_name, &player.char_name, &command).await {
                Ok(_) => {
                    self.registry
                        .set_last_reward_playtime(&player.platform_id, server_name, online_minutes)
                        .await?;
                    info!(server = %server_name, char_name = %player.char_name, online_minutes, "reward granted");
                }
                Err(e) => {
                    warn!(server = %server_name, char_name = %player.char_name, "reward grant failed: {e}");
                }
            }
        }
        Ok(())
    }
}
