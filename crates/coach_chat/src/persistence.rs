//! File-backed data store.
//!
//! Everything is append-only JSONL under one data directory:
//! ```text
//! <data>/
//! ├── tables/<table>.jsonl     # Confirmed action records
//! ├── history/<domain>.jsonl   # Message history per domain
//! └── usage.jsonl              # Token usage records
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::ActionSink;
use crate::error::{ChatError, ChatResult};
use crate::store::HistoryStore;
use crate::types::{Domain, Message};
use crate::usage::{UsageRecord, UsageSink};

/// JSONL store implementing every persistence seam.
#[derive(Debug, Clone)]
pub struct FileDataStore {
    root: PathBuf,
}

impl FileDataStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join("tables").join(format!("{}.jsonl", table))
    }

    fn history_path(&self, domain: Domain) -> PathBuf {
        self.root.join("history").join(format!("{}.jsonl", domain.as_str()))
    }

    fn usage_path(&self) -> PathBuf {
        self.root.join("usage.jsonl")
    }

    /// Every record written to a table, oldest first.
    pub fn load_table(&self, table: &str) -> ChatResult<Vec<Value>> {
        read_lines(&self.table_path(table))
    }

    pub fn load_usage(&self) -> ChatResult<Vec<UsageRecord>> {
        read_lines(&self.usage_path())
    }
}

fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> ChatResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for item in items {
        let json = serde_json::to_string(item)?;
        writeln!(file, "{}", json)?;
    }
    Ok(())
}

/// Read a JSONL file; a missing file is empty and unparseable lines are skipped.
fn read_lines<T: DeserializeOwned>(path: &Path) -> ChatResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping line {} of {}: {}", number + 1, path.display(), e),
        }
    }
    Ok(items)
}

#[async_trait]
impl ActionSink for FileDataStore {
    async fn insert(&self, table: &str, record: Value) -> ChatResult<()> {
        let Value::Object(mut fields) = record else {
            return Err(ChatError::Persistence(format!("record for {} is not an object", table)));
        };
        fields
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        append_lines(&self.table_path(table), &[Value::Object(fields)])?;
        debug!("Inserted record into {}", table);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileDataStore {
    async fn append(&self, domain: Domain, message: &Message) -> ChatResult<()> {
        let mut stored = message.clone();
        stored.streaming = false;
        append_lines(&self.history_path(domain), &[stored])
    }

    async fn load_recent(&self, domain: Domain, limit: usize) -> ChatResult<Vec<Message>> {
        let mut messages: Vec<Message> = read_lines(&self.history_path(domain))?;
        messages.sort_by_key(|m| m.created_at);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

#[async_trait]
impl UsageSink for FileDataStore {
    async fn insert_usage(&self, batch: Vec<UsageRecord>) -> ChatResult<()> {
        append_lines(&self.usage_path(), &batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::TokenUsage;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (FileDataStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileDataStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_insert_adds_id_and_timestamp() {
        let (store, _dir) = create_test_store();
        store.insert("meal_logs", json!({"name": "Skyr", "calories": 300})).await.unwrap();
        store.insert("meal_logs", json!({"name": "Orange", "calories": 60})).await.unwrap();

        let rows = store.load_table("meal_logs").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], "Orange");
        assert!(rows[0]["id"].is_string());
        assert!(rows[0]["created_at"].is_string());
        assert!(store.load_table("reminders").unwrap().is_empty());

        assert!(store.insert("meal_logs", json!([1, 2])).await.is_err());
    }

    #[tokio::test]
    async fn test_history_recent_window() {
        let (store, _dir) = create_test_store();
        for i in 0..5 {
            let mut message = Message::user(Domain::Training, format!("satz {}", i));
            message.streaming = true;
            store.append(Domain::Training, &message).await.unwrap();
        }

        let recent = store.load_recent(Domain::Training, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "satz 3");
        assert!(!recent[1].streaming);
        assert!(store.load_recent(Domain::Medical, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_and_corrupt_lines() {
        let (store, dir) = create_test_store();
        store
            .insert_usage(vec![UsageRecord::new(Domain::Nutrition, "mock", TokenUsage::new(10, 5))])
            .await
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(dir.path().join("usage.jsonl")).unwrap();
        writeln!(file, "not json").unwrap();

        let usage = store.load_usage().unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].output_tokens, 5);
    }
}
