//! Thread cache and session storage.
//!
//! Messages live in two tiers:
//!
//! ```text
//! ThreadStore (memory, one lock) ──save_to──▶ SessionStorage (fast local tier)
//!        ▲                                          │
//!        └───────────── hydrate() ◀── HistoryStore (authoritative remote tier)
//! ```
//!
//! Storage keys:
//! - `threads` - domain -> messages, capped, streaming flags cleared
//! - `active_domain`
//! - `hydrated` - set once the remote tier has been consulted

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ThreadConfig;
use crate::error::{ChatError, ChatResult};
use crate::types::{Action, Domain, Message};

const THREADS_KEY: &str = "threads";
const ACTIVE_DOMAIN_KEY: &str = "active_domain";
const HYDRATED_KEY: &str = "hydrated";

/// Fast local key-value tier.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> ChatResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ChatResult<()>;
    fn remove(&self, key: &str) -> ChatResult<()>;
}

/// Storage that lives as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Authoritative message history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, domain: Domain, message: &Message) -> ChatResult<()>;

    /// Up to `limit` most recent messages of a domain, oldest first.
    async fn load_recent(&self, domain: Domain, limit: usize) -> ChatResult<Vec<Message>>;
}

/// What `hydrate` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// Already hydrated in this session
    Skipped,
    /// Threads restored from session storage
    LocalCache,
    /// Threads loaded from the history store
    Remote,
}

struct ThreadState {
    threads: BTreeMap<Domain, Vec<Message>>,
    active: Domain,
    hydrated: bool,
}

impl ThreadState {
    fn messages_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.threads
            .values_mut()
            .flat_map(|thread| thread.iter_mut())
            .find(|m| m.id == id)
    }

    fn is_empty(&self) -> bool {
        self.threads.values().all(Vec::is_empty)
    }
}

/// Per-domain message threads for one session.
pub struct ThreadStore {
    state: Mutex<ThreadState>,
    max_messages: usize,
}

impl ThreadStore {
    pub fn new(config: &ThreadConfig) -> Self {
        Self {
            state: Mutex::new(ThreadState {
                threads: Domain::ALL.iter().map(|d| (*d, Vec::new())).collect(),
                active: Domain::DEFAULT,
                hydrated: false,
            }),
            max_messages: config.max_messages.max(1),
        }
    }

    pub fn active_domain(&self) -> Domain {
        self.state.lock().active
    }

    /// Make another thread active. Other threads are left untouched.
    pub fn switch_domain(&self, domain: Domain) -> bool {
        let mut state = self.state.lock();
        if state.active == domain {
            return false;
        }
        debug!("Switching active thread {} -> {}", state.active, domain);
        state.active = domain;
        true
    }

    /// Append to the message's domain thread, evicting the oldest beyond the cap.
    pub fn append(&self, message: Message) {
        let mut state = self.state.lock();
        let thread = state.threads.entry(message.domain).or_default();
        thread.push(message);
        let excess = thread.len().saturating_sub(self.max_messages);
        if excess > 0 {
            thread.drain(..excess);
        }
    }

    pub fn messages(&self, domain: Domain) -> Vec<Message> {
        self.state.lock().threads.get(&domain).cloned().unwrap_or_default()
    }

    pub fn active_messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        state.threads.get(&state.active).cloned().unwrap_or_default()
    }

    pub fn find_message(&self, id: &str) -> Option<Message> {
        self.state.lock().messages_mut(id).map(|m| m.clone())
    }

    /// Replace a message's content. Streamed chunks are cumulative.
    pub fn update_message_content(&self, id: &str, content: &str) -> ChatResult<()> {
        self.update_message(id, |message| {
            message.content.clear();
            message.content.push_str(content);
        })
    }

    /// Apply a mutation to one message under the lock.
    pub fn update_message<R>(&self, id: &str, f: impl FnOnce(&mut Message) -> R) -> ChatResult<R> {
        let mut state = self.state.lock();
        let message = state
            .messages_mut(id)
            .ok_or_else(|| ChatError::MessageNotFound(id.to_string()))?;
        Ok(f(message))
    }

    /// Apply a mutation to the action list holding `action_id`.
    ///
    /// The closure receives the list and the action's index in it.
    pub fn update_action<R>(&self, action_id: &str, f: impl FnOnce(&mut Vec<Action>, usize) -> R) -> ChatResult<R> {
        let mut state = self.state.lock();
        for message in state.threads.values_mut().flat_map(|t| t.iter_mut()) {
            if let Some(index) = message.actions.iter().position(|a| a.id == action_id) {
                return Ok(f(&mut message.actions, index));
            }
        }
        Err(ChatError::ActionNotFound(action_id.to_string()))
    }

    pub fn find_action(&self, action_id: &str) -> Option<Action> {
        self.update_action(action_id, |actions, index| actions[index].clone()).ok()
    }

    pub fn is_hydrated(&self) -> bool {
        self.state.lock().hydrated
    }

    /// Write threads, active domain and hydration flag to storage.
    pub fn save_to(&self, storage: &dyn SessionStorage) -> ChatResult<()> {
        let (threads, active, hydrated) = {
            let state = self.state.lock();
            let threads: BTreeMap<Domain, Vec<Message>> = state
                .threads
                .iter()
                .map(|(domain, thread)| {
                    let skip = thread.len().saturating_sub(self.max_messages);
                    let cached = thread[skip..]
                        .iter()
                        .cloned()
                        .map(|mut m| {
                            m.streaming = false;
                            m
                        })
                        .collect();
                    (*domain, cached)
                })
                .collect();
            (threads, state.active, state.hydrated)
        };

        storage.set(THREADS_KEY, &serde_json::to_string(&threads)?)?;
        storage.set(ACTIVE_DOMAIN_KEY, &serde_json::to_string(&active)?)?;
        storage.set(HYDRATED_KEY, &serde_json::to_string(&hydrated)?)?;
        Ok(())
    }

    /// Load cached state from storage. Returns true when any message was found.
    pub fn restore_from(&self, storage: &dyn SessionStorage) -> ChatResult<bool> {
        let threads: BTreeMap<Domain, Vec<Message>> = match storage.get(THREADS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BTreeMap::new(),
        };
        let active: Option<Domain> = storage
            .get(ACTIVE_DOMAIN_KEY)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;
        let hydrated = stored_flag(storage)?;

        let mut state = self.state.lock();
        for (domain, mut thread) in threads {
            let skip = thread.len().saturating_sub(self.max_messages);
            thread.drain(..skip);
            state.threads.insert(domain, thread);
        }
        if let Some(active) = active {
            state.active = active;
        }
        state.hydrated |= hydrated;
        Ok(!state.is_empty())
    }

    /// Fill empty threads once per session: local cache first, then history.
    ///
    /// The lock is never held across the history reads.
    pub async fn hydrate(&self, storage: &dyn SessionStorage, history: &dyn HistoryStore) -> ChatResult<Hydration> {
        {
            let mut state = self.state.lock();
            if state.hydrated {
                return Ok(Hydration::Skipped);
            }
            state.hydrated = true;
        }

        let already_hydrated = stored_flag(storage).unwrap_or(false);
        let restored = match self.restore_from(storage) {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Discarding unreadable session cache: {}", e);
                false
            }
        };
        if restored || already_hydrated {
            info!("Threads restored from session storage");
            self.save_to(storage)?;
            return Ok(Hydration::LocalCache);
        }

        let mut loaded = Vec::new();
        for domain in Domain::ALL {
            match history.load_recent(domain, self.max_messages).await {
                Ok(messages) if !messages.is_empty() => loaded.push((domain, messages)),
                Ok(_) => {}
                Err(e) => warn!("Failed to load {} history: {}", domain, e),
            }
        }

        {
            let mut state = self.state.lock();
            for (domain, messages) in loaded {
                let thread = state.threads.entry(domain).or_default();
                if thread.is_empty() {
                    *thread = messages;
                }
            }
        }

        info!("Threads hydrated from history store");
        self.save_to(storage)?;
        Ok(Hydration::Remote)
    }
}

fn stored_flag(storage: &dyn SessionStorage) -> ChatResult<bool> {
    Ok(storage
        .get(HYDRATED_KEY)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    struct FixedHistory {
        messages: Vec<Message>,
        reads: Mutex<usize>,
    }

    #[async_trait]
    impl HistoryStore for FixedHistory {
        async fn append(&self, _domain: Domain, _message: &Message) -> ChatResult<()> {
            Ok(())
        }

        async fn load_recent(&self, domain: Domain, limit: usize) -> ChatResult<Vec<Message>> {
            *self.reads.lock() += 1;
            let matching: Vec<_> = self.messages.iter().filter(|m| m.domain == domain).cloned().collect();
            let skip = matching.len().saturating_sub(limit);
            Ok(matching[skip..].to_vec())
        }
    }

    fn store(cap: usize) -> ThreadStore {
        ThreadStore::new(&ThreadConfig {
            max_messages: cap,
            history_turns: 10,
        })
    }

    #[test]
    fn test_append_evicts_oldest() {
        let store = store(3);
        for i in 0..5 {
            store.append(Message::user(Domain::Nutrition, format!("m{}", i)));
        }
        let contents: Vec<_> = store.messages(Domain::Nutrition).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_switch_leaves_other_threads_alone() {
        let store = store(10);
        store.append(Message::user(Domain::General, "hallo"));
        assert!(store.switch_domain(Domain::Training));
        assert!(!store.switch_domain(Domain::Training));
        store.append(Message::user(Domain::Training, "Bankdrücken"));

        assert_eq!(store.active_domain(), Domain::Training);
        assert_eq!(store.messages(Domain::General).len(), 1);
        assert_eq!(store.active_messages()[0].content, "Bankdrücken");
    }

    #[test]
    fn test_update_content_replaces() {
        let store = store(10);
        let message = Message::placeholder(Domain::Nutrition);
        let id = message.id.clone();
        store.append(message);

        store.update_message_content(&id, "Gu").unwrap();
        store.update_message_content(&id, "Guten Appetit").unwrap();
        assert_eq!(store.find_message(&id).unwrap().content, "Guten Appetit");
        assert!(matches!(
            store.update_message_content("missing", "x"),
            Err(ChatError::MessageNotFound(_))
        ));
    }

    #[test]
    fn test_save_clears_streaming_and_restores() {
        let storage = MemoryStorage::new();
        let store = store(10);
        store.switch_domain(Domain::Nutrition);
        store.append(Message::placeholder(Domain::Nutrition));
        store.save_to(&storage).unwrap();

        let restored = self::store(10);
        assert!(restored.restore_from(&storage).unwrap());
        assert_eq!(restored.active_domain(), Domain::Nutrition);
        let messages = restored.messages(Domain::Nutrition);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert!(!messages[0].streaming);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("session"));
        assert_eq!(storage.get("threads").unwrap(), None);
        storage.set("threads", "{}").unwrap();
        assert_eq!(storage.get("threads").unwrap().as_deref(), Some("{}"));
        storage.remove("threads").unwrap();
        assert_eq!(storage.get("threads").unwrap(), None);
    }

    #[tokio::test]
    async fn test_hydrate_runs_once() {
        let storage = MemoryStorage::new();
        let history = FixedHistory {
            messages: vec![
                Message::user(Domain::Training, "Plan?"),
                Message::assistant(Domain::Training, "Hier ist dein Plan."),
            ],
            reads: Mutex::new(0),
        };
        let store = store(10);

        assert_eq!(store.hydrate(&storage, &history).await.unwrap(), Hydration::Remote);
        assert_eq!(store.messages(Domain::Training).len(), 2);
        assert_eq!(*history.reads.lock(), Domain::ALL.len());

        assert_eq!(store.hydrate(&storage, &history).await.unwrap(), Hydration::Skipped);
        assert_eq!(*history.reads.lock(), Domain::ALL.len());

        let next_session = self::store(10);
        assert_eq!(next_session.hydrate(&storage, &history).await.unwrap(), Hydration::LocalCache);
        assert_eq!(*history.reads.lock(), Domain::ALL.len());
    }
}
