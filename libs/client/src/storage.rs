use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ClientError;

/// Key under which the serialized user record is persisted.
pub const USER_KEY: &str = "tably.user";

/// Abstraction over the host's durable client storage.
///
/// Backed by whatever the embedding surface provides (browser local storage,
/// a keychain-adjacent file, an in-memory map in tests). The session manager
/// persists exactly one key through this trait: the user identity record.
/// Access tokens, session ids, and refresh tokens must never pass through it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError>;
    async fn remove(&self, key: &str) -> Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests and headless tools)
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}
