use v2e_store::{MacroState, ProviderState};

/// An attempted transition that is not in the legal-edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from:?} -> {to:?}")]
pub struct InvalidTransition<S: std::fmt::Debug> {
    pub from: S,
    pub to: S,
}

/// Errors a P-FSM operation can return. Mirrors the error taxonomy in
/// `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider transition: {0}")]
    InvalidTransition(#[from] InvalidTransition<ProviderState>),

    #[error("persistence failed, in-memory state rolled back: {0}")]
    PersistenceFailure(#[from] v2e_store::StoreError),

    #[error("checkpoint urn must be non-null")]
    NullCheckpointUrn,

    #[error("executor failed: {0}")]
    ExecutorError(String),

    #[error("{processed} items processed, {errors} errors exceeds failure threshold {threshold}; auto-paused")]
    HighErrorRate {
        processed: u64,
        errors: u64,
        threshold: f64,
    },

    #[error("dependency '{0}' not met")]
    DependencyNotMet(String),
}

/// Errors an M-FSM operation can return.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("invalid macro transition: {0}")]
    InvalidTransition(#[from] InvalidTransition<MacroState>),

    #[error("persistence failed, in-memory state rolled back: {0}")]
    PersistenceFailure(#[from] v2e_store::StoreError),

    #[error("provider id '{0}' is null or already registered")]
    DuplicateOrNullProvider(String),

    #[error("event dropped on backpressure after 1s enqueue timeout")]
    DropOnBackpressure,

    #[error("dependency graph has a cycle through provider '{0}'")]
    DependencyCycle(String),
}
