//! P-FSM: the per-provider state engine.
//!
//! `BaseProvider` owns one provider's lifecycle: state transitions, event
//! emission, checkpointing, quota/backoff handling, and crash recovery. It
//! is generic over nothing — family-specific behavior (fetch/parse/diff) is
//! injected entirely through the [`Executor`] closure, per the polymorphism
//! note in `spec.md` §9.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use v2e_store::{Checkpoint, Event, EventType, ProviderRecord, ProviderState, Store};
use v2e_urn::Urn;

use crate::error::ProviderError;
use crate::event_sink::EventSink;
use crate::executor::Executor;
use crate::pool::ObjectPool;
use crate::transitions::validate_provider_transition;

/// Construction input for a [`BaseProvider`]. Defaults match `spec.md` §4.2.
pub struct ProviderConfig {
    pub id: String,
    pub r#type: String,
    pub store: Option<Store>,
    pub executor: Option<Arc<dyn Executor>>,
    pub dependencies: Vec<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            r#type: r#type.into(),
            store: None,
            executor: None,
            dependencies: Vec::new(),
            batch_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

struct Inner {
    state: ProviderState,
    last_checkpoint: String,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

/// Point-in-time stats, as returned by [`BaseProvider::get_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStats {
    pub id: String,
    pub r#type: String,
    pub state: ProviderState,
    pub last_checkpoint: String,
    pub processed_count: u64,
    pub error_count: u64,
    pub permits_held: i64,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

pub struct BaseProvider {
    id: String,
    r#type: String,
    store: Option<Store>,
    executor: RwLock<Option<Arc<dyn Executor>>>,
    dependencies: Vec<String>,
    pub(crate) batch_size: usize,
    #[allow(dead_code)]
    max_retries: u32,
    #[allow(dead_code)]
    retry_delay: Duration,

    inner: RwLock<Inner>,
    processed_count: AtomicU64,
    error_count: AtomicU64,
    permits_held: AtomicI64,

    event_sink: RwLock<Option<Arc<dyn EventSink>>>,
    cancel: CancellationToken,
    backoff_task: Mutex<Option<tokio::task::JoinHandle<()>>>,

    // Scratch-object pools for the hot checkpoint path (spec.md §5.1): every
    // `save_checkpoint`/`emit` call checks out a reset instance instead of
    // allocating a fresh `Checkpoint`/`Event`.
    checkpoint_pool: ObjectPool<Checkpoint>,
    event_pool: ObjectPool<Event>,
}

impl BaseProvider {
    /// Constructs a provider, loading persisted state for `config.id` if the
    /// store has a record. A transient persisted state (`ACQUIRING`,
    /// `WAITING_QUOTA`, `WAITING_BACKOFF`) is coerced to `IDLE` — the
    /// operation that produced it did not complete (`spec.md` §3).
    pub async fn new(config: ProviderConfig) -> Result<Arc<Self>, ProviderError> {
        let now = Utc::now();

        let (state, last_checkpoint, processed_count, error_count, created_at) =
            if let Some(store) = &config.store {
                match store.get_provider_state(&config.id).await? {
                    Some(rec) => {
                        let state = if rec.state.is_transient() {
                            ProviderState::Idle
                        } else {
                            rec.state
                        };
                        (
                            state,
                            rec.last_checkpoint,
                            rec.processed_count,
                            rec.error_count,
                            rec.created_at,
                        )
                    }
                    None => (ProviderState::Idle, String::new(), 0, 0, now),
                }
            } else {
                (ProviderState::Idle, String::new(), 0, 0, now)
            };

        let provider = Arc::new(Self {
            id: config.id,
            r#type: config.r#type,
            store: config.store,
            executor: RwLock::new(config.executor),
            dependencies: config.dependencies,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            inner: RwLock::new(Inner {
                state,
                last_checkpoint,
                created_at,
                updated_at: now,
            }),
            processed_count: AtomicU64::new(processed_count),
            error_count: AtomicU64::new(error_count),
            permits_held: AtomicI64::new(0),
            event_sink: RwLock::new(None),
            cancel: CancellationToken::new(),
            backoff_task: Mutex::new(None),
            checkpoint_pool: ObjectPool::new(),
            event_pool: ObjectPool::new(),
        });

        // Persist the coerced-to-IDLE state immediately so a second crash
        // before any further activity still recovers to IDLE, not back to
        // the stale transient state.
        if provider.store.is_some() {
            provider.persist_current().await?;
        }

        Ok(provider)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn r#type(&self) -> &str {
        &self.r#type
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.event_sink.write().await = Some(sink);
    }

    /// Attaches (or replaces) the executor invoked by `execute()`. Used by
    /// `ProviderTemplate`, which must be constructed after the provider it
    /// drives (it holds a `Weak<BaseProvider>` back-reference, and a cycle
    /// through a strong `Arc` would leak both).
    pub async fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.executor.write().await = Some(executor);
    }

    pub async fn state(&self) -> ProviderState {
        self.inner.read().await.state
    }

    pub fn permits_held(&self) -> i64 {
        self.permits_held.load(Ordering::SeqCst)
    }

    pub async fn get_stats(&self) -> ProviderStats {
        let inner = self.inner.read().await;
        ProviderStats {
            id: self.id.clone(),
            r#type: self.r#type.clone(),
            state: inner.state,
            last_checkpoint: inner.last_checkpoint.clone(),
            processed_count: self.processed_count.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            permits_held: self.permits_held.load(Ordering::SeqCst),
            created_at: inner.created_at,
            updated_at: inner.updated_at,
        }
    }

    /// Returns an error naming the first dependency that is absent or in a
    /// state that blocks this provider from starting.
    pub fn check_dependencies(
        &self,
        states: &std::collections::HashMap<String, ProviderState>,
    ) -> Result<(), ProviderError> {
        for dep in &self.dependencies {
            match states.get(dep) {
                None => return Err(ProviderError::DependencyNotMet(dep.clone())),
                Some(s) if matches!(
                    s,
                    ProviderState::WaitingQuota | ProviderState::WaitingBackoff | ProviderState::Paused
                ) =>
                {
                    return Err(ProviderError::DependencyNotMet(dep.clone()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------

    pub async fn start(self: &Arc<Self>) -> Result<(), ProviderError> {
        self.transition(ProviderState::Acquiring).await?;
        self.emit(EventType::ProviderStarted, None).await;
        Ok(())
    }

    pub async fn pause(self: &Arc<Self>) -> Result<(), ProviderError> {
        self.transition(ProviderState::Paused).await?;
        self.emit(EventType::ProviderPaused, None).await;
        Ok(())
    }

    pub async fn resume(self: &Arc<Self>) -> Result<(), ProviderError> {
        self.transition(ProviderState::Acquiring).await?;
        self.emit(EventType::ProviderResumed, None).await;
        Ok(())
    }

    /// Transitions to `TERMINATED` from any non-terminal state, cancels any
    /// pending asynchronous work (backoff timer, in-flight executor calls
    /// observing the cancellation token), and emits `PROVIDER_COMPLETED`.
    pub async fn stop(self: &Arc<Self>) -> Result<(), ProviderError> {
        self.transition(ProviderState::Terminated).await?;
        self.cancel.cancel();
        if let Some(handle) = self.backoff_task.lock().await.take() {
            handle.abort();
        }
        self.emit(EventType::ProviderCompleted, None).await;
        Ok(())
    }

    /// Grants `n` permits. From `ACQUIRING`, begins running and schedules
    /// one `execute()`. From `WAITING_QUOTA`, retries by moving back to
    /// `ACQUIRING`. Any other state: the permit count still increases, but
    /// the state is untouched.
    pub async fn on_quota_granted(self: &Arc<Self>, n: i64) -> Result<(), ProviderError> {
        self.permits_held.fetch_add(n, Ordering::SeqCst);

        let pre_state = self.state().await;
        match pre_state {
            ProviderState::Acquiring => {
                self.transition(ProviderState::Running).await?;
                self.emit(EventType::QuotaGranted, None).await;
                let this = self.clone();
                tokio::spawn(async move {
                    let _ = this.execute().await;
                });
            }
            ProviderState::WaitingQuota => {
                self.transition(ProviderState::Acquiring).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Revokes `n` permits, clamped at zero. From `RUNNING`, moves to
    /// `WAITING_QUOTA`.
    pub async fn on_quota_revoked(self: &Arc<Self>, n: i64) -> Result<(), ProviderError> {
        self.permits_held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                Some((held - n).max(0))
            })
            .expect("fetch_update closure never returns None");

        if self.state().await == ProviderState::Running {
            self.transition(ProviderState::WaitingQuota).await?;
            self.emit(EventType::QuotaRevoked, None).await;
        }
        Ok(())
    }

    /// From `RUNNING`, moves to `WAITING_BACKOFF` and schedules a wake-up
    /// after `duration`; if still `WAITING_BACKOFF` when the timer fires,
    /// moves to `ACQUIRING`. The timer is cancelled (becomes a no-op) by
    /// `stop()`.
    pub async fn on_rate_limited(self: &Arc<Self>, duration: Duration) -> Result<(), ProviderError> {
        if self.state().await != ProviderState::Running {
            return Ok(());
        }

        self.transition(ProviderState::WaitingBackoff).await?;
        self.emit(EventType::RateLimited, None).await;

        let this = self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if this.state().await == ProviderState::WaitingBackoff {
                        let _ = this.transition(ProviderState::Acquiring).await;
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
        *self.backoff_task.lock().await = Some(handle);
        Ok(())
    }

    /// Validates, persists (if a store is attached), then flips in-memory
    /// state. On persistence failure the in-memory state is left untouched.
    pub async fn transition(self: &Arc<Self>, target: ProviderState) -> Result<(), ProviderError> {
        let mut inner = self.inner.write().await;
        validate_provider_transition(inner.state, target)?;

        if inner.state == target {
            return Ok(()); // idempotent no-op, no persistence write amplification
        }

        if let Some(store) = &self.store {
            let record = self.record_snapshot(&inner, target);
            store.save_provider_state(record).await?;
        }

        inner.state = target;
        inner.updated_at = Utc::now();
        Ok(())
    }

    /// Persists a checkpoint, bumps counters, and persists the updated
    /// provider record. Every 100th successful checkpoint emits `CHECKPOINT`.
    pub async fn save_checkpoint(
        self: &Arc<Self>,
        urn: Option<Urn>,
        success: bool,
        err_msg: impl Into<String>,
    ) -> Result<(), ProviderError> {
        let urn = urn.ok_or(ProviderError::NullCheckpointUrn)?;

        let processed = self.processed_count.fetch_add(1, Ordering::SeqCst) + 1;
        if !success {
            self.error_count.fetch_add(1, Ordering::SeqCst);
        }

        let checkpoint = {
            let mut guard = self.checkpoint_pool.acquire(
                || Checkpoint {
                    urn: String::new(),
                    provider_id: self.id.clone(),
                    processed_at: Utc::now(),
                    success: false,
                    error_message: None,
                },
                |c| c.reset(self.id.clone()),
            );
            guard.urn = urn.to_string();
            guard.success = success;
            guard.error_message = {
                let m = err_msg.into();
                if m.is_empty() {
                    None
                } else {
                    Some(m)
                }
            };
            guard.clone()
        };

        if let Some(store) = &self.store {
            store.save_checkpoint(checkpoint).await?;
        }

        {
            let mut inner = self.inner.write().await;
            inner.last_checkpoint = urn.to_string();
            inner.updated_at = Utc::now();
            if let Some(store) = &self.store {
                let record = self.record_snapshot(&inner, inner.state);
                store.save_provider_state(record).await?;
            }
        }

        if processed % 100 == 0 {
            self.emit(EventType::Checkpoint, None).await;
        }

        Ok(())
    }

    /// Invokes the user executor. Does not itself drive a state transition
    /// — on error it counts the failure and emits `PROVIDER_FAILED`; the
    /// executor or an event handler decides what happens next.
    pub async fn execute(self: &Arc<Self>) -> Result<(), ProviderError> {
        let Some(executor) = self.executor.read().await.clone() else {
            return Ok(());
        };

        match executor.execute().await {
            Ok(()) => Ok(()),
            Err(msg) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
                self.emit(
                    EventType::ProviderFailed,
                    Some(serde_json::json!({ "message": msg.clone() })),
                )
                .await;
                Err(ProviderError::ExecutorError(msg))
            }
        }
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    async fn emit(&self, r#type: EventType, data: Option<serde_json::Value>) {
        if let Some(sink) = self.event_sink.read().await.clone() {
            let mut guard = self
                .event_pool
                .acquire(|| Event::new(r#type, self.id.clone()), |e| e.reset(r#type, self.id.clone()));
            guard.data = data;
            let event = guard.clone();
            drop(guard);
            sink.handle_event(event).await;
        }
    }

    async fn persist_current(&self) -> Result<(), ProviderError> {
        let inner = self.inner.read().await;
        if let Some(store) = &self.store {
            let record = self.record_snapshot(&inner, inner.state);
            store.save_provider_state(record).await?;
        }
        Ok(())
    }

    fn record_snapshot(&self, inner: &Inner, state: ProviderState) -> ProviderRecord {
        ProviderRecord {
            id: self.id.clone(),
            r#type: self.r#type.clone(),
            state,
            last_checkpoint: inner.last_checkpoint.clone(),
            processed_count: self.processed_count.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            created_at: inner.created_at,
            updated_at: Utc::now(),
        }
    }
}
