//! The provider template: a reusable batched pull-transform-save loop
//! implementing `v2e_fsm::Executor`, plus its supporting pieces (the
//! external-store contract, field diffing, and the parallel-per-item
//! worker pool). `spec.md` §4.3.

mod diff;
mod external_store;
mod template;
mod worker_pool;

pub use diff::{deep_equal, diff_keys};
pub use external_store::{ExternalStore, FetchPage, ListPage};
pub use template::{Progress, ProviderTemplate, TemplateConfig};
pub use worker_pool::WorkerPool;
