use crate::llm::types::{ChatOptions, LLMError, LLMResponse, Message};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: LLMResponse,
    pub inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Keys oldest first
    order: VecDeque<String>,
}

impl CacheState {
    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Fingerprint of a chat request.
///
/// Two requests share a key exactly when their messages and options
/// serialize identically; routing hints in the request context do not
/// participate.
pub fn fingerprint(messages: &[Message], options: &ChatOptions) -> Result<String, LLMError> {
    let bytes = serde_json::to_vec(&(messages, options))?;
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).to_string())
}

/// Bounded TTL cache of successful chat responses.
///
/// Eviction is first-in first-out by insertion time; expired entries are
/// dropped lazily when looked up.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_size: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<LLMResponse> {
        let mut state = self.state.lock().await;
        let expired = match state.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };

        if expired {
            debug!("Cache entry {} expired", key);
            state.remove(key);
            return None;
        }

        state.entries.get(key).map(|entry| entry.response.clone())
    }

    /// Store a response, evicting the oldest entries to stay within bounds.
    /// Re-inserting an existing key refreshes it in place.
    pub async fn insert(&self, key: String, response: LLMResponse) {
        if self.max_size == 0 {
            return;
        }

        let mut state = self.state.lock().await;
        let entry = CacheEntry {
            response,
            inserted_at: Instant::now(),
        };

        if state.entries.contains_key(&key) {
            state.order.retain(|k| k != &key);
            state.order.push_back(key.clone());
            state.entries.insert(key, entry);
            return;
        }

        while state.entries.len() >= self.max_size {
            match state.order.pop_front() {
                Some(oldest) => {
                    debug!("Evicting cache entry {}", oldest);
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }

        state.order.push_back(key.clone());
        state.entries.insert(key, entry);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }
}
