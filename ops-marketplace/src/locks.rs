use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use ops_core::ChatId;
use tokio::sync::Mutex as AsyncMutex;

/// Per-`chat_id` serialization for inventory-mutating flows, so two
/// concurrent `!sell` lines from the same speaker cannot race on the same
/// slot. Nested-lock shape: an outer `std::sync::Mutex` guards the map
/// itself (never held across an await), the inner `tokio::sync::Mutex`
/// is held for the duration of one flow.
#[derive(Default)]
pub struct ChatLocks {
    per_chat: StdMutex<HashMap<ChatId, Arc<AsyncMutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, chat_id: ChatId) -> Arc<AsyncMutex<()>> {
        let mut per_chat = self.per_chat.lock().unwrap();
        per_chat.entry(chat_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_chat_id_serializes_through_the_same_mutex() {
        let locks = ChatLocks::new();
        let a = locks.lock_for(1);
        let b = locks.lock_for(1);
        assert!(Arc::ptr_eq(&a, &b));

        let _guard = a.lock().await;
        assert!(b.try_lock().is_err());
    }

    #[tokio::test]
    async fn different_chat_ids_do_not_contend() {
        let locks = ChatLocks::new();
        let a = locks.lock_for(1);
        let b = locks.lock_for(2);
        let _guard = a.lock().await;
        assert!(b.try_lock().is_ok());
    }
}
