use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use ops_core::{ChatId, PendingRegistration, PlatformId};
use tokio::sync::Mutex;

/// How long a minted code stays claimable.
const CODE_TTL_MINUTES: i64 = 10;

/// In-memory holding area for the three-step registration dance: mint a
/// code for a chat id, bind it to a character name when the player types
/// it in-game, then resolve it against a live RCON row on the next status
/// tick. Nothing here is persisted; a restart simply forgets pending codes
/// and the player re-runs `/register`.
#[derive(Default)]
pub struct RegistrationDesk {
    pending: Mutex<HashMap<String, PendingRegistration>>,
}

impl RegistrationDesk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step 1: mint a fresh code for `chat_id`, expiring in
    /// [`CODE_TTL_MINUTES`] from `now`.
    pub async fn mint(&self, chat_id: ChatId, now: NaiveDateTime, code: String) -> PendingRegistration {
        let entry = PendingRegistration {
            code: code.clone(),
            chat_id,
            expires_at: now + ChronoDuration::minutes(CODE_TTL_MINUTES),
            character_name: None,
        };
        self.pending.lock().await.insert(code, entry.clone());
        entry
    }

    /// Step 2: the player typed `!register <code>` as `char_name`. Returns
    /// `true` if an unexpired pending code matched.
    pub async fn observe_code(&self, code: &str, char_name: &str, now: NaiveDateTime) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(code) {
            Some(entry) if entry.expires_at > now => {
                entry.character_name = Some(char_name.to_string());
                true
            }
            _ => false,
        }
    }

    /// Drop any code whose TTL has lapsed without being resolved.
    pub async fn sweep_expired(&self, now: NaiveDateTime) {
        self.pending.lock().await.retain(|_, entry| entry.expires_at > now);
    }

    /// Step 3: called once per status tick with the set of characters
    /// currently online (`char_name -> platform_id`, from this tick's live
    /// RCON rows). Every pending entry whose bound character is online is
    /// removed and returned for identity binding.
    pub async fn resolve_ready(
        &self,
        online: &HashMap<String, PlatformId>,
    ) -> Vec<(ChatId, PlatformId, String)> {
        let mut pending = self.pending.lock().await;
        let mut ready = Vec::new();
        pending.retain(|_, entry| {
            let Some(char_name) = &entry.character_name else {
                return true;
            };
            if let Some(platform_id) = online.get(char_name) {
                ready.push((entry.chat_id, platform_id.clone(), char_name.clone()));
                false
            } else {
                true
            }
        });
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn full_dance_binds_identity_once_the_character_is_seen_online() {
        let desk = RegistrationDesk::new();
        desk.mint(42, now(), "ABC123".into()).await;

        assert!(desk.observe_code("ABC123", "Alice", now()).await);

        let mut online = HashMap::new();
        online.insert("Bob".to_string(), "steam:bob".to_string());
        assert!(desk.resolve_ready(&online).await.is_empty());

        online.insert("Alice".to_string(), "steam:alice".to_string());
        let ready = desk.resolve_ready(&online).await;
        assert_eq!(ready, vec![(42, "steam:alice".to_string(), "Alice".to_string())]);

        assert!(desk.resolve_ready(&online).await.is_empty());
    }

    #[tokio::test]
    async fn expired_code_is_not_observed_or_swept_into_resolution() {
        let desk = RegistrationDesk::new();
        let minted_at = now();
        desk.mint(1, minted_at, "DEAD00".into()).await;

        let later = minted_at + ChronoDuration::minutes(CODE_TTL_MINUTES + 1);
        assert!(!desk.observe_code("DEAD00", "Ghost", later).await);

        desk.sweep_expired(later).await;
        let mut online = HashMap::new();
        online.insert("Ghost".to_string(), "steam:ghost".to_string());
        assert!(desk.resolve_ready(&online).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_code_is_rejected() {
        let desk = RegistrationDesk::new();
        assert!(!desk.observe_code("NOPE", "Alice", now()).await);
    }
}
