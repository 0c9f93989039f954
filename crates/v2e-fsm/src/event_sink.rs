use async_trait::async_trait;

use v2e_store::Event;

/// Receives events emitted by a provider. `MacroFsm::add_provider` wires an
/// implementation of this trait (backed by its event channel) into every
/// registered `BaseProvider`; that one-directional callback is what lets the
/// M-FSM own its providers without the provider holding a pointer back.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_event(&self, event: Event);
}
