use async_trait::async_trait;

/// The unit of work a P-FSM drives while `RUNNING`.
///
/// Consumed as a zero-argument callable returning either success or a
/// failure description (`spec.md` §6). Implementations must not themselves
/// drive state transitions except through `BaseProvider`'s documented
/// handlers — the executor reports outcomes, it does not decide lifecycle.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self) -> Result<(), String>;
}
