//! The provider template (`spec.md` §4.3): a reusable batched
//! pull-transform-save loop built atop a [`BaseProvider`], implementing
//! [`Executor`] so the P-FSM can drive it directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use v2e_fsm::{BaseProvider, Executor, ProviderState};
use v2e_urn::{Urn, UrnError};

use crate::diff::diff_keys;
use crate::external_store::ExternalStore;
use crate::worker_pool::WorkerPool;

/// Construction input, per `spec.md` §4.3.
pub struct TemplateConfig {
    pub batch_size: usize,
    pub checkpoint_interval: u64,
    pub failure_threshold: f64,
    /// JSON key identifying a record's primary id. Defaults to `"id"`.
    pub id_field: String,
    /// JSON key carrying a cursor value to resume `fetch` from. Defaults to
    /// `"last_modified"`.
    pub cursor_field: String,
    pub external: Arc<dyn ExternalStore>,
    pub urn_builder: Arc<dyn Fn(&str) -> Result<Urn, UrnError> + Send + Sync>,
    /// `Some(n)` runs the parallel-per-item variant with `n` workers;
    /// `None` processes records sequentially within the batch.
    pub workers: Option<usize>,
}

impl TemplateConfig {
    pub fn new(
        external: Arc<dyn ExternalStore>,
        urn_builder: Arc<dyn Fn(&str) -> Result<Urn, UrnError> + Send + Sync>,
    ) -> Self {
        Self {
            batch_size: 100,
            checkpoint_interval: 100,
            failure_threshold: 0.1,
            id_field: "id".to_string(),
            cursor_field: "last_modified".to_string(),
            external,
            urn_builder,
            workers: None,
        }
    }
}

struct Cursor {
    offset: u64,
    cursor: Option<String>,
}

/// Point-in-time progress, per `spec.md` §7's `GetProgress()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub processed_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub last_checkpoint: String,
    pub batch_size: usize,
    pub offset: u64,
}

/// Outcome of applying one record against the external store, before the
/// processed/error bookkeeping that follows it.
enum ItemOutcome {
    MissingId,
    Applied {
        id: String,
        cursor_value: Option<String>,
    },
    Failed,
}

async fn process_one(
    external: &Arc<dyn ExternalStore>,
    id_field: &str,
    cursor_field: &str,
    record: Value,
) -> ItemOutcome {
    let Some(id) = record.get(id_field).and_then(Value::as_str).map(str::to_string) else {
        return ItemOutcome::MissingId;
    };

    let result: Result<(), String> = async {
        match external.get(&id).await? {
            Some(existing) => {
                let changed = diff_keys(&existing, &record, id_field);
                if !changed.is_empty() {
                    let mut patch = serde_json::Map::new();
                    for key in &changed {
                        if let Some(v) = record.get(key) {
                            patch.insert(key.clone(), v.clone());
                        }
                    }
                    patch.insert(id_field.to_string(), Value::String(id.clone()));
                    external.update(&id, Value::Object(patch)).await?;
                }
            }
            None => {
                external.save(record.clone()).await?;
            }
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            let cursor_value = record
                .get(cursor_field)
                .and_then(Value::as_str)
                .map(str::to_string);
            ItemOutcome::Applied { id, cursor_value }
        }
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "item apply failed, continuing batch");
            ItemOutcome::Failed
        }
    }
}

/// Drives one provider family's batch loop. Holds a `Weak` reference to the
/// [`BaseProvider`] it is the executor for — the provider's strong `Arc` to
/// this template (as `Arc<dyn Executor>`) would otherwise form a reference
/// cycle through a strong back-pointer (`spec.md` §9).
pub struct ProviderTemplate {
    provider: Weak<BaseProvider>,
    config: TemplateConfig,
    cursor: Mutex<Cursor>,
    processed_count: AtomicU64,
    error_count: AtomicU64,
}

impl ProviderTemplate {
    /// Builds the template and wires it as `provider`'s executor. `provider`
    /// must already exist — this is always the second half of a two-step
    /// construction (`BaseProvider::new` first, `ProviderTemplate::new`
    /// second).
    pub async fn new(provider: &Arc<BaseProvider>, config: TemplateConfig) -> Arc<Self> {
        let template = Arc::new(Self {
            provider: Arc::downgrade(provider),
            config,
            cursor: Mutex::new(Cursor {
                offset: 0,
                cursor: None,
            }),
            processed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        });
        provider
            .set_executor(template.clone() as Arc<dyn Executor>)
            .await;
        template
    }

    pub async fn progress(&self) -> Progress {
        let processed = self.processed_count.load(Ordering::SeqCst);
        let errors = self.error_count.load(Ordering::SeqCst);
        let last_checkpoint = match self.provider.upgrade() {
            Some(p) => p.get_stats().await.last_checkpoint,
            None => String::new(),
        };
        let offset = self.cursor.lock().await.offset;
        Progress {
            processed_count: processed,
            error_count: errors,
            error_rate: if processed == 0 {
                0.0
            } else {
                errors as f64 / processed as f64
            },
            last_checkpoint,
            batch_size: self.config.batch_size,
            offset,
        }
    }

    /// Applies the bookkeeping side effects of one item's outcome:
    /// processed/error counters, periodic checkpointing, cursor advance.
    async fn record_outcome(&self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::MissingId | ItemOutcome::Failed => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
            }
            ItemOutcome::Applied { id, cursor_value } => {
                let processed = self.processed_count.fetch_add(1, Ordering::SeqCst) + 1;
                if processed % self.config.checkpoint_interval == 0 {
                    if let Some(provider) = self.provider.upgrade() {
                        match (self.config.urn_builder)(&id) {
                            Ok(urn) => {
                                if let Err(e) =
                                    provider.save_checkpoint(Some(urn), true, "").await
                                {
                                    // Open question (c): retry-vs-drop on checkpoint
                                    // persistence failure is a config knob not yet
                                    // exposed; default is log-and-continue.
                                    tracing::warn!(error = %e, "checkpoint persistence failed, continuing batch");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(id = %id, error = %e, "urn_builder rejected id, skipping checkpoint");
                            }
                        }
                    }
                }
                if let Some(cursor_value) = cursor_value {
                    self.cursor.lock().await.cursor = Some(cursor_value);
                }
            }
        }
    }
}

#[async_trait]
impl Executor for ProviderTemplate {
    async fn execute(&self) -> Result<(), String> {
        let Some(provider) = self.provider.upgrade() else {
            return Err("provider dropped".to_string());
        };

        let processed = self.processed_count.load(Ordering::SeqCst);
        let errors = self.error_count.load(Ordering::SeqCst);
        if processed > 0 {
            let error_rate = errors as f64 / processed as f64;
            if error_rate > self.config.failure_threshold {
                let _ = provider.transition(ProviderState::Paused).await;
                return Err(format!(
                    "{processed} processed, {errors} errors exceeds failure threshold {}; auto-paused",
                    self.config.failure_threshold
                ));
            }
        }

        let (offset, cursor) = {
            let c = self.cursor.lock().await;
            (c.offset, c.cursor.clone())
        };

        let page = self
            .config
            .external
            .fetch(offset, self.config.batch_size, cursor)
            .await?;

        if page.records.is_empty() {
            return Ok(());
        }

        let count = page.records.len() as u64;
        let id_field = self.config.id_field.clone();
        let cursor_field = self.config.cursor_field.clone();

        match self.config.workers {
            Some(workers) => {
                let pool = WorkerPool::new(workers);
                let external = self.config.external.clone();
                let outcomes = pool
                    .run(
                        page.records,
                        move |record| {
                            let external = external.clone();
                            let id_field = id_field.clone();
                            let cursor_field = cursor_field.clone();
                            async move { process_one(&external, &id_field, &cursor_field, record).await }
                        },
                        provider.cancellation_token(),
                    )
                    .await;
                for outcome in outcomes {
                    self.record_outcome(outcome).await;
                }
            }
            None => {
                for record in page.records {
                    let outcome =
                        process_one(&self.config.external, &id_field, &cursor_field, record).await;
                    self.record_outcome(outcome).await;
                }
            }
        }

        self.cursor.lock().await.offset = offset + count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex as TMutex;
    use v2e_fsm::ProviderConfig;

    struct FakeStore {
        pages: TMutex<Vec<Vec<Value>>>,
        saved: TMutex<Vec<Value>>,
        updated: TMutex<Vec<(String, Value)>>,
        existing: TMutex<std::collections::HashMap<String, Value>>,
    }

    impl FakeStore {
        fn new(pages: Vec<Vec<Value>>) -> Self {
            Self {
                pages: TMutex::new(pages),
                saved: TMutex::new(Vec::new()),
                updated: TMutex::new(Vec::new()),
                existing: TMutex::new(std::collections::HashMap::new()),
            }
        }

    }

    #[async_trait::async_trait]
    impl ExternalStore for FakeStore {
        async fn fetch(
            &self,
            _offset: u64,
            _limit: usize,
            _cursor: Option<String>,
        ) -> Result<crate::external_store::FetchPage, String> {
            let mut pages = self.pages.lock().await;
            if pages.is_empty() {
                return Ok(crate::external_store::FetchPage {
                    records: Vec::new(),
                    cursor: None,
                });
            }
            let records = pages.remove(0);
            Ok(crate::external_store::FetchPage {
                records,
                cursor: None,
            })
        }

        async fn get(&self, id: &str) -> Result<Option<Value>, String> {
            Ok(self.existing.lock().await.get(id).cloned())
        }

        async fn save(&self, record: Value) -> Result<(), String> {
            self.saved.lock().await.push(record);
            Ok(())
        }

        async fn update(&self, id: &str, changed: Value) -> Result<(), String> {
            self.updated.lock().await.push((id.to_string(), changed));
            Ok(())
        }

        async fn list(&self, _offset: u64, _limit: usize) -> Result<crate::external_store::ListPage, String> {
            Ok(crate::external_store::ListPage {
                items: Vec::new(),
                total: 0,
            })
        }
    }

    fn test_urn_builder() -> Arc<dyn Fn(&str) -> Result<Urn, UrnError> + Send + Sync> {
        Arc::new(|id: &str| Urn::new(v2e_urn::Provider::Nvd, v2e_urn::RecordType::Cve, id))
    }

    async fn make_provider() -> Arc<BaseProvider> {
        BaseProvider::new(ProviderConfig::new("test_provider", "template_test"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn happy_path_saves_new_records() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![
            json!({"id": "a", "value": 1}),
            json!({"id": "b", "value": 2}),
        ]]));
        let mut config = TemplateConfig::new(external.clone(), test_urn_builder());
        config.checkpoint_interval = 1;
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();

        assert_eq!(external.saved.lock().await.len(), 2);
        let progress = template.progress().await;
        assert_eq!(progress.processed_count, 2);
        assert_eq!(progress.error_count, 0);
        assert_eq!(progress.offset, 2);
    }

    #[tokio::test]
    async fn empty_page_is_a_noop() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![]]));
        let config = TemplateConfig::new(external, test_urn_builder());
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();
        assert_eq!(template.progress().await.offset, 0);
    }

    #[tokio::test]
    async fn missing_id_counts_as_error_and_continues() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![
            json!({"value": 1}),
            json!({"id": "b", "value": 2}),
        ]]));
        let config = TemplateConfig::new(external.clone(), test_urn_builder());
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();

        let progress = template.progress().await;
        assert_eq!(progress.processed_count, 1);
        assert_eq!(progress.error_count, 1);
        assert_eq!(external.saved.lock().await.len(), 1);
    }

    // S4: error rate above the failure threshold auto-pauses the provider.
    #[tokio::test]
    async fn high_error_rate_auto_pauses() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![]]));
        let mut config = TemplateConfig::new(external, test_urn_builder());
        config.failure_threshold = 0.1;
        let template = ProviderTemplate::new(&provider, config).await;

        template.processed_count.store(100, Ordering::SeqCst);
        template.error_count.store(15, Ordering::SeqCst);

        provider.transition(ProviderState::Acquiring).await.unwrap();
        provider.on_quota_granted(1).await;

        let result = template.execute().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("auto-paused"));
        assert_eq!(provider.state().await, ProviderState::Paused);
    }

    // S7: identical record produces no update/save call but still counts processed.
    #[tokio::test]
    async fn identical_record_skips_update_but_counts_processed() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![json!({
            "id": "x", "description": "same"
        })]]));
        external
            .existing
            .lock()
            .await
            .insert("x".to_string(), json!({"id": "x", "description": "same"}));
        let config = TemplateConfig::new(external.clone(), test_urn_builder());
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();

        assert!(external.saved.lock().await.is_empty());
        assert!(external.updated.lock().await.is_empty());
        assert_eq!(template.progress().await.processed_count, 1);
    }

    #[tokio::test]
    async fn changed_field_triggers_update() {
        let provider = make_provider().await;
        let external = Arc::new(FakeStore::new(vec![vec![json!({
            "id": "x", "description": "new"
        })]]));
        external
            .existing
            .lock()
            .await
            .insert("x".to_string(), json!({"id": "x", "description": "old"}));
        let config = TemplateConfig::new(external.clone(), test_urn_builder());
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();

        let updated = external.updated.lock().await;
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, "x");
    }

    #[tokio::test]
    async fn parallel_variant_processes_all_items() {
        let provider = make_provider().await;
        let records: Vec<Value> = (0..20)
            .map(|i| json!({"id": format!("id-{i}"), "value": i}))
            .collect();
        let external = Arc::new(FakeStore::new(vec![records]));
        let mut config = TemplateConfig::new(external.clone(), test_urn_builder());
        config.workers = Some(4);
        let template = ProviderTemplate::new(&provider, config).await;

        template.execute().await.unwrap();

        assert_eq!(external.saved.lock().await.len(), 20);
        assert_eq!(template.progress().await.processed_count, 20);
    }
}
