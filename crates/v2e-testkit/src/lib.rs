//! Shared fixtures for the workspace's scenario tests (`spec.md` §8): an
//! in-memory `ExternalStore` and a small builder for wiring a demo
//! `ProviderTemplate` without a real feed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use v2e_provider::{ExternalStore, FetchPage, ListPage, TemplateConfig};
use v2e_urn::{Provider, RecordType, Urn, UrnError};

/// An in-memory `ExternalStore` backed by a single `Mutex<HashMap<...>>`,
/// seeded with fixed pages returned one at a time by `fetch`.
pub struct MockExternalStore {
    records: Mutex<HashMap<String, Value>>,
    pages: Mutex<Vec<Vec<Value>>>,
}

impl MockExternalStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Queues `page` to be returned by the next `fetch` call; once every
    /// queued page is drained, `fetch` returns empty pages forever.
    pub async fn push_page(&self, page: Vec<Value>) {
        self.pages.lock().await.push(page);
    }

    pub async fn seed(&self, id: &str, record: Value) {
        self.records.lock().await.insert(id.to_string(), record);
    }

    pub async fn get_saved(&self, id: &str) -> Option<Value> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

impl Default for MockExternalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalStore for MockExternalStore {
    async fn fetch(
        &self,
        _offset: u64,
        _limit: usize,
        _cursor: Option<String>,
    ) -> Result<FetchPage, String> {
        let mut pages = self.pages.lock().await;
        if pages.is_empty() {
            return Ok(FetchPage {
                records: Vec::new(),
                cursor: None,
            });
        }
        Ok(FetchPage {
            records: pages.remove(0),
            cursor: None,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Value>, String> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn save(&self, record: Value) -> Result<(), String> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "record missing 'id'".to_string())?
            .to_string();
        self.records.lock().await.insert(id, record);
        Ok(())
    }

    async fn update(&self, id: &str, changed: Value) -> Result<(), String> {
        let mut records = self.records.lock().await;
        let existing = records
            .get_mut(id)
            .ok_or_else(|| format!("no record with id '{id}'"))?;
        if let (Some(existing_map), Some(changed_map)) =
            (existing.as_object_mut(), changed.as_object())
        {
            for (k, v) in changed_map {
                existing_map.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn list(&self, offset: u64, limit: usize) -> Result<ListPage, String> {
        let records = self.records.lock().await;
        let total = records.len() as u64;
        let items: Vec<Value> = records
            .values()
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect();
        Ok(ListPage { items, total })
    }
}

/// Builds a `TemplateConfig` pointed at a `MockExternalStore`, with urns
/// tagged `Provider::Nvd`/`RecordType::Cve` — the same pair the CLI's demo
/// provider uses.
pub fn demo_template_config(external: Arc<MockExternalStore>) -> TemplateConfig {
    let urn_builder: Arc<dyn Fn(&str) -> Result<Urn, UrnError> + Send + Sync> =
        Arc::new(|id: &str| Urn::new(Provider::Nvd, RecordType::Cve, id));
    TemplateConfig::new(external, urn_builder)
}
