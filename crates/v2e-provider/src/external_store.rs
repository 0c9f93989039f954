//! The external record store contract (`spec.md` §6): a set of named remote
//! procedures, one per provider family, that the provider template drives.
//! Implementations live outside this crate — `v2e-testkit::MockExternalStore`
//! is the one used in tests and the CLI demo path.

use async_trait::async_trait;
use serde_json::Value;

/// One page of records from `fetch`, monotonic in `offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    pub records: Vec<Value>,
    pub cursor: Option<String>,
}

/// One page of records from `list`, for cross-family synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub total: u64,
}

/// Either a transport failure or an error payload identifiable as such — the
/// core treats both the same way: as a batch error carrying a message.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn fetch(
        &self,
        offset: u64,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<FetchPage, String>;

    async fn get(&self, id: &str) -> Result<Option<Value>, String>;

    async fn save(&self, record: Value) -> Result<(), String>;

    async fn update(&self, id: &str, changed: Value) -> Result<(), String>;

    async fn list(&self, offset: u64, limit: usize) -> Result<ListPage, String>;
}
