//! Persisted record types and the event vocabulary shared by the P-FSM and
//! M-FSM. These are plain data — no behavior beyond the small helpers that
//! classify a state, which both the FSMs and the store need to agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use v2e_urn::Urn;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Fleet-level coordinator state. `Bootstrapping` is initial, `Draining` is
/// terminal (see `v2e_fsm::transitions` for the legal-edge table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroState {
    Bootstrapping,
    Orchestrating,
    Stabilizing,
    Draining,
}

/// Per-provider lifecycle state. `Idle` is initial, `Terminated` is terminal
/// and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderState {
    Idle,
    Acquiring,
    Running,
    WaitingQuota,
    WaitingBackoff,
    Paused,
    Terminated,
}

impl ProviderState {
    /// States a provider can only be in transiently, while some operation is
    /// in flight. A provider loaded from storage in one of these states
    /// indicates that operation never completed (crash recovery), and must
    /// be coerced back to `Idle` before the provider starts serving.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderState::Acquiring | ProviderState::WaitingQuota | ProviderState::WaitingBackoff
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderState::Terminated)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted state for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub r#type: String,
    pub state: ProviderState,
    /// URN string of the last successful checkpoint, empty if none yet.
    pub last_checkpoint: String,
    pub processed_count: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted state for the macro coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroRecord {
    pub id: String,
    pub state: MacroState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ingested item, keyed by its URN. Later writes for the same URN
/// overwrite earlier ones — there is no history, only the latest outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub urn: String,
    pub provider_id: String,
    pub processed_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl Checkpoint {
    /// Parses and discards `urn` purely to enforce the invariant that every
    /// persisted checkpoint's URN is well-formed.
    pub fn validate_urn(&self) -> Result<Urn, v2e_urn::UrnError> {
        Urn::parse(&self.urn)
    }

    /// Resets this checkpoint in place for reuse from an
    /// `v2e_fsm::pool`-style object pool.
    pub fn reset(&mut self, provider_id: impl Into<String>) {
        self.urn.clear();
        self.provider_id = provider_id.into();
        self.processed_at = Utc::now();
        self.success = false;
        self.error_message = None;
    }
}

/// A grant of abstract quota units to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitAllocation {
    pub provider_id: String,
    pub permit_count: i64,
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    ProviderStarted,
    ProviderCompleted,
    ProviderFailed,
    ProviderPaused,
    ProviderResumed,
    QuotaRevoked,
    QuotaGranted,
    RateLimited,
    Checkpoint,
}

/// A notification emitted by a provider and consumed by the M-FSM's event
/// loop (or any other observer wired to the same callback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub r#type: EventType,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Value>,
}

impl Event {
    pub fn new(r#type: EventType, provider_id: impl Into<String>) -> Self {
        Self {
            r#type,
            provider_id: provider_id.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Resets this event in place for reuse from a `v2e_fsm::pool`-style
    /// object pool: clears the payload and re-stamps identity fields.
    pub fn reset(&mut self, r#type: EventType, provider_id: impl Into<String>) {
        self.r#type = r#type;
        self.provider_id = provider_id.into();
        self.timestamp = Utc::now();
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_states_classified_correctly() {
        assert!(ProviderState::Acquiring.is_transient());
        assert!(ProviderState::WaitingQuota.is_transient());
        assert!(ProviderState::WaitingBackoff.is_transient());
        assert!(!ProviderState::Idle.is_transient());
        assert!(!ProviderState::Running.is_transient());
        assert!(!ProviderState::Paused.is_transient());
        assert!(!ProviderState::Terminated.is_transient());
    }

    #[test]
    fn checkpoint_validates_its_urn() {
        let cp = Checkpoint {
            urn: "v2e::nvd::cve::CVE-2024-12233".to_string(),
            provider_id: "nvd".to_string(),
            processed_at: Utc::now(),
            success: true,
            error_message: None,
        };
        assert!(cp.validate_urn().is_ok());

        let bad = Checkpoint {
            urn: "not-a-urn".to_string(),
            ..cp
        };
        assert!(bad.validate_urn().is_err());
    }

    #[test]
    fn event_reset_clears_payload() {
        let mut e = Event::new(EventType::Checkpoint, "nvd")
            .with_data(serde_json::json!({"k": "v"}));
        assert!(e.data.is_some());
        e.reset(EventType::ProviderStarted, "mitre");
        assert!(e.data.is_none());
        assert_eq!(e.provider_id, "mitre");
    }
}
