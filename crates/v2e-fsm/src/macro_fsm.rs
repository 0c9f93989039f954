//! M-FSM: the fleet coordinator.
//!
//! `MacroFsm` owns a set of [`BaseProvider`]s, wires itself as each one's
//! [`EventSink`], and runs a single-threaded batching event loop that reacts
//! to their events by advancing the macro state (`spec.md` §4.3).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use v2e_store::{Event, EventType, MacroRecord, MacroState, ProviderState, Store};

use crate::error::MacroError;
use crate::event_sink::EventSink;
use crate::provider::BaseProvider;
use crate::transitions::validate_macro_transition;

const EVENT_CHANNEL_CAPACITY: usize = 1000;
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const BATCH_CAPACITY: usize = 50;
const FLUSH_TICK: Duration = Duration::from_millis(100);

struct Inner {
    state: MacroState,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

/// The fleet coordinator. Cheap to clone (all state is behind `Arc`s); the
/// event-loop task holds its own clone so the struct can be dropped by its
/// owner without stopping delivery prematurely.
pub struct MacroFsm {
    id: String,
    store: Option<Store>,
    inner: RwLock<Inner>,
    providers: RwLock<HashMap<String, Arc<BaseProvider>>>,
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    flush_now: Notify,
    shutdown: AtomicBool,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dropped_events: Arc<AtomicU64>,
}

/// Wraps a [`mpsc::Sender`] so providers can emit events into the macro loop
/// without holding a reference back to `MacroFsm` itself.
struct ChannelSink {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn handle_event(&self, event: Event) {
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    error = %MacroError::DropOnBackpressure,
                    "event receiver gone, dropping event"
                );
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    error = %MacroError::DropOnBackpressure,
                    timeout_secs = ENQUEUE_TIMEOUT.as_secs(),
                    "event queue stayed full past the enqueue timeout, dropping event"
                );
            }
        }
    }
}

impl MacroFsm {
    pub async fn new(id: impl Into<String>, store: Option<Store>) -> Result<Arc<Self>, MacroError> {
        let id = id.into();
        let now = Utc::now();

        let (state, created_at) = if let Some(store) = &store {
            match store.get_macro_state(&id).await? {
                Some(rec) => (rec.state, rec.created_at),
                None => (MacroState::Bootstrapping, now),
            }
        } else {
            (MacroState::Bootstrapping, now)
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let fsm = Arc::new(Self {
            id,
            store,
            inner: RwLock::new(Inner {
                state,
                created_at,
                updated_at: now,
            }),
            providers: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            flush_now: Notify::new(),
            shutdown: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            dropped_events: Arc::new(AtomicU64::new(0)),
        });

        if fsm.store.is_some() {
            fsm.persist_current().await?;
        }

        Ok(fsm)
    }

    pub async fn state(&self) -> MacroState {
        self.inner.read().await.state
    }

    /// Registers a provider, wiring this fleet's event channel as its sink.
    /// Rejects duplicate or empty ids, and any dependency edge that would
    /// introduce a cycle into the startup graph.
    pub async fn add_provider(&self, provider: Arc<BaseProvider>) -> Result<(), MacroError> {
        let id = provider.id().to_string();
        if id.is_empty() {
            return Err(MacroError::DuplicateOrNullProvider(id));
        }

        let mut providers = self.providers.write().await;
        if providers.contains_key(&id) {
            return Err(MacroError::DuplicateOrNullProvider(id));
        }

        providers.insert(id.clone(), provider.clone());
        if Self::topological_order(&providers).is_none() {
            providers.remove(&id);
            return Err(MacroError::DependencyCycle(id));
        }
        drop(providers);

        provider
            .set_event_sink(Arc::new(ChannelSink {
                tx: self.tx.clone(),
                dropped: self.dropped_events.clone(),
            }))
            .await;
        Ok(())
    }

    /// Count of events dropped on backpressure (receiver gone, or the queue
    /// stayed full past [`ENQUEUE_TIMEOUT`]). See `spec.md` §4.4/§7.
    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_events.load(Ordering::SeqCst)
    }

    pub async fn remove_provider(&self, id: &str) -> Option<Arc<BaseProvider>> {
        self.providers.write().await.remove(id)
    }

    pub async fn get_provider(&self, id: &str) -> Option<Arc<BaseProvider>> {
        self.providers.read().await.get(id).cloned()
    }

    pub async fn provider_states(&self) -> HashMap<String, ProviderState> {
        let providers = self.providers.read().await;
        let mut out = HashMap::with_capacity(providers.len());
        for (id, p) in providers.iter() {
            out.insert(id.clone(), p.state().await);
        }
        out
    }

    /// A Kahn topological sort over the dependency graph. Returns `None` only
    /// for a genuine cycle among *registered* providers. A dependency naming
    /// a provider that isn't registered (yet, or ever) is not an edge at all
    /// here — per `spec.md` §9(b), such ids are tolerated by the sort; the
    /// provider that names one is instead blocked later, when
    /// `BaseProvider::check_dependencies` can't find it in the state map.
    fn topological_order(providers: &HashMap<String, Arc<BaseProvider>>) -> Option<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = providers.keys().map(|k| (k.as_str(), 0)).collect();
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();

        for (id, p) in providers.iter() {
            for dep in p.dependencies() {
                if !providers.contains_key(dep.as_str()) {
                    continue;
                }
                if let Some(entry) = in_degree.get_mut(id.as_str()) {
                    *entry += 1;
                }
                edges.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(providers.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(children) = edges.get(id) {
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if order.len() == providers.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Dependency-respecting startup order for all registered providers.
    pub async fn get_provider_startup_order(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        Self::topological_order(&providers).unwrap_or_default()
    }

    /// Starts every registered provider in dependency order, checking each
    /// one's dependencies are in a non-blocking state immediately beforehand.
    pub async fn start_all_providers_in_order(&self) -> Result<(), MacroError> {
        let order = self.get_provider_startup_order().await;
        for id in order {
            let states = self.provider_states().await;
            let providers = self.providers.read().await;
            let Some(provider) = providers.get(&id).cloned() else {
                continue;
            };
            drop(providers);

            if let Err(e) = provider.check_dependencies(&states) {
                tracing::warn!(provider = %id, error = %e, "provider dependency not met, skipping start");
                continue;
            }
            provider
                .start()
                .await
                .map_err(|_| MacroError::DependencyCycle(id.clone()))?;
        }
        Ok(())
    }

    /// Spawns the batching event-loop task. Idempotent: a second call is a
    /// no-op if the loop is already running.
    pub fn spawn_event_loop(self: &Arc<Self>) {
        let mut guard = match self.loop_handle.try_lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if guard.is_some() {
            return;
        }

        let rx = match self.rx.try_lock() {
            Ok(mut rx_guard) => rx_guard.take(),
            Err(_) => None,
        };
        let Some(mut rx) = rx else { return };

        let fsm = self.clone();
        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(BATCH_CAPACITY);
            let mut ticker = tokio::time::interval(FLUSH_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(event) => {
                                batch.push(event);
                                if batch.len() >= BATCH_CAPACITY {
                                    fsm.process_batch(std::mem::take(&mut batch)).await;
                                }
                            }
                            None => {
                                fsm.process_batch(std::mem::take(&mut batch)).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if !batch.is_empty() {
                            fsm.process_batch(std::mem::take(&mut batch)).await;
                        }
                        if fsm.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    _ = fsm.flush_now.notified() => {
                        if !batch.is_empty() {
                            fsm.process_batch(std::mem::take(&mut batch)).await;
                        }
                    }
                }
            }
        });

        *guard = Some(handle);
    }

    /// Forces an immediate flush of whatever is currently buffered, without
    /// waiting for the size threshold or the next tick.
    pub fn flush(&self) {
        self.flush_now.notify_one();
    }

    async fn process_batch(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        let saw_provider_started = batch
            .iter()
            .any(|e| e.r#type == EventType::ProviderStarted);

        for event in &batch {
            tracing::debug!(
                provider = %event.provider_id,
                event = ?event.r#type,
                "macro fsm observed event"
            );
        }

        let state = self.state().await;
        if state == MacroState::Bootstrapping && saw_provider_started {
            let _ = self.transition(MacroState::Orchestrating).await;
        }

        if state == MacroState::Orchestrating {
            // Snapshot taken outside any provider lock: a provider's own
            // RwLock write guard is never held while we read its state here.
            let states = self.provider_states().await;
            if !states.is_empty() && states.values().all(|s| s.is_terminal()) {
                let _ = self.transition(MacroState::Stabilizing).await;
            }
        }
    }

    pub async fn transition(&self, target: MacroState) -> Result<(), MacroError> {
        let mut inner = self.inner.write().await;
        validate_macro_transition(inner.state, target)?;

        if inner.state == target {
            return Ok(());
        }

        if let Some(store) = &self.store {
            store
                .save_macro_state(MacroRecord {
                    id: self.id.clone(),
                    state: target,
                    created_at: inner.created_at,
                    updated_at: Utc::now(),
                })
                .await?;
        }

        inner.state = target;
        inner.updated_at = Utc::now();
        Ok(())
    }

    /// Transitions to `DRAINING`, stops every provider, and halts the event
    /// loop once its last flush completes.
    pub async fn stop(self: &Arc<Self>) -> Result<(), MacroError> {
        self.transition(MacroState::Draining).await?;

        let providers: Vec<_> = self.providers.read().await.values().cloned().collect();
        for provider in providers {
            let _ = provider.stop().await;
        }

        self.shutdown.store(true, Ordering::SeqCst);
        self.flush();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn persist_current(&self) -> Result<(), MacroError> {
        let inner = self.inner.read().await;
        if let Some(store) = &self.store {
            store
                .save_macro_state(MacroRecord {
                    id: self.id.clone(),
                    state: inner.state,
                    created_at: inner.created_at,
                    updated_at: inner.updated_at,
                })
                .await?;
        }
        Ok(())
    }
}
