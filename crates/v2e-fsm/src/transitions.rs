//! Pure, table-driven validation of legal state edges for both FSMs.
//!
//! Side-effect-free by construction: these functions only read their
//! arguments. Same-state transitions are always legal for both machines
//! (idempotent `Transition(s -> s)` per the universal invariants).

use v2e_store::{MacroState, ProviderState};

use crate::InvalidTransition;

/// Legal macro edges:
///
/// ```text
/// BOOTSTRAPPING -> ORCHESTRATING | DRAINING
/// ORCHESTRATING -> STABILIZING   | DRAINING
/// STABILIZING   -> ORCHESTRATING | DRAINING
/// DRAINING      -> (none)
/// ```
pub fn validate_macro_transition(
    from: MacroState,
    to: MacroState,
) -> Result<(), InvalidTransition<MacroState>> {
    use MacroState::*;

    if from == to {
        return Ok(());
    }

    let legal = matches!(
        (from, to),
        (Bootstrapping, Orchestrating)
            | (Bootstrapping, Draining)
            | (Orchestrating, Stabilizing)
            | (Orchestrating, Draining)
            | (Stabilizing, Orchestrating)
            | (Stabilizing, Draining)
    );

    if legal {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// Legal provider edges:
///
/// ```text
/// IDLE            -> ACQUIRING | TERMINATED
/// ACQUIRING       -> RUNNING | PAUSED | TERMINATED
/// RUNNING         -> WAITING_QUOTA | WAITING_BACKOFF | PAUSED | TERMINATED
/// WAITING_QUOTA   -> ACQUIRING | TERMINATED
/// WAITING_BACKOFF -> ACQUIRING | TERMINATED
/// PAUSED          -> ACQUIRING | TERMINATED
/// TERMINATED      -> (none)
/// ```
pub fn validate_provider_transition(
    from: ProviderState,
    to: ProviderState,
) -> Result<(), InvalidTransition<ProviderState>> {
    use ProviderState::*;

    if from == to {
        return Ok(());
    }

    let legal = matches!(
        (from, to),
        (Idle, Acquiring)
            | (Idle, Terminated)
            | (Acquiring, Running)
            | (Acquiring, Paused)
            | (Acquiring, Terminated)
            | (Running, WaitingQuota)
            | (Running, WaitingBackoff)
            | (Running, Paused)
            | (Running, Terminated)
            | (WaitingQuota, Acquiring)
            | (WaitingQuota, Terminated)
            | (WaitingBackoff, Acquiring)
            | (WaitingBackoff, Terminated)
            | (Paused, Acquiring)
            | (Paused, Terminated)
    );

    if legal {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}
