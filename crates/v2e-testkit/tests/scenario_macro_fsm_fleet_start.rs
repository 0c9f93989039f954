//! End-to-end: `MacroFsm` starts two dependent providers in order and
//! reaches `Stabilizing` once both terminate.

use std::sync::Arc;

use v2e_fsm::{BaseProvider, MacroFsm, ProviderConfig, ProviderState};

#[tokio::test]
async fn fleet_starts_in_dependency_order_then_stabilizes() {
    let fsm = MacroFsm::new("fleet", None).await.unwrap();

    let mut base_config = ProviderConfig::new("nvd", "cve");
    base_config.dependencies = Vec::new();
    let base = BaseProvider::new(base_config).await.unwrap();

    let mut dependent_config = ProviderConfig::new("cisa", "kev");
    dependent_config.dependencies = vec!["nvd".to_string()];
    let dependent = BaseProvider::new(dependent_config).await.unwrap();

    fsm.add_provider(dependent.clone()).await.unwrap();
    fsm.add_provider(base.clone()).await.unwrap();

    let order = fsm.get_provider_startup_order().await;
    assert_eq!(order, vec!["nvd".to_string(), "cisa".to_string()]);

    fsm.spawn_event_loop();
    fsm.start_all_providers_in_order().await.unwrap();

    assert_eq!(base.state().await, ProviderState::Acquiring);
    assert_eq!(dependent.state().await, ProviderState::Acquiring);

    base.stop().await.unwrap();
    dependent.stop().await.unwrap();
    fsm.flush();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert_eq!(fsm.state().await, v2e_fsm::MacroState::Stabilizing);
    let _ = Arc::clone(&fsm);
}
