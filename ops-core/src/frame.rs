//! Internal dispatch unit published between components, mirroring the
//! teacher's `transactor::frame::EventFrame`. Kept deliberately small: only
//! the two events this workspace's status loop actually produces.

use crate::types::{ChatId, PlatformId, PlayerRow};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum EventFrame {
    /// Published once per status tick per server.
    PlayersUpdated {
        server_name: String,
        players: Vec<PlayerRow>,
        levels: HashMap<String, u32>,
        identities: HashMap<PlatformId, Option<ChatId>>,
    },
    /// Published when the guild-sync consumer observes a guild roster
    /// change. The chat-side role reconciler that would consume this is
    /// out of scope for this workspace.
    GuildRosterChanged {
        guild_id: i64,
        platform_ids: Vec<PlatformId>,
    },
    Shutdown,
}
