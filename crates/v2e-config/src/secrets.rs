//! Secret resolution for provider API keys.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"NVD_API_KEY"`), never
//!   values.
//! - Callers invoke [`resolve_secrets_for_mode`] once at startup; the
//!   returned [`ResolvedSecrets`] is passed into provider construction.
//!   Don't scatter `std::env::var` calls elsewhere.
//! - `Debug` redacts every resolved value.
//! - Error messages name the env var, never its value.
//!
//! # Mode-aware enforcement
//! - `Live`: every enabled provider's api-key env var must be set.
//! - `Demo`: nothing is required — all keys optional.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::provider_modes::RunMode;

/// Per-provider API keys resolved from the environment, keyed by provider id.
///
/// `Debug` redacts every value — only the set of providers that resolved is
/// visible.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    keys: BTreeMap<String, String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "keys",
                &self
                    .keys
                    .keys()
                    .map(|id| (id.clone(), "<REDACTED>"))
                    .collect::<BTreeMap<_, _>>(),
            )
            .finish()
    }
}

impl ResolvedSecrets {
    pub fn api_key(&self, provider_id: &str) -> Option<&str> {
        self.keys.get(provider_id).map(String::as_str)
    }
}

/// Read a non-empty string value at `pointer`, `None` if absent, non-string,
/// or blank after trimming.
fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolves one API key env var name per entry under `/providers`, for every
/// provider with a `/providers/<id>/api_key_env` pointer. In `Live` mode a
/// provider that sets the pointer but whose named env var is unset or empty
/// fails the whole resolution; in `Demo` mode missing keys are silently
/// `None`.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: RunMode) -> Result<ResolvedSecrets> {
    let mut keys = BTreeMap::new();

    let Some(providers) = config_json.pointer("/providers").and_then(Value::as_object) else {
        return Ok(ResolvedSecrets { keys });
    };

    for (provider_id, provider_cfg) in providers {
        let Some(var_name) = read_str_at(provider_cfg, "/api_key_env") else {
            continue;
        };

        match resolve_env(&var_name) {
            Some(value) => {
                keys.insert(provider_id.clone(), value);
            }
            None if mode == RunMode::Live => {
                bail!(
                    "SECRETS_MISSING mode=Live provider='{provider_id}': required env var '{var_name}' is not set or empty"
                );
            }
            None => {}
        }
    }

    Ok(ResolvedSecrets { keys })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn demo_mode_never_requires_keys() {
        let config = json!({ "providers": { "nvd": { "api_key_env": "NVD_API_KEY_TEST_UNSET" } } });
        let secrets = resolve_secrets_for_mode(&config, RunMode::Demo).unwrap();
        assert!(secrets.api_key("nvd").is_none());
    }

    #[test]
    fn live_mode_fails_on_missing_required_key() {
        let config = json!({ "providers": { "nvd": { "api_key_env": "NVD_API_KEY_TEST_UNSET" } } });
        let err = resolve_secrets_for_mode(&config, RunMode::Live).unwrap_err();
        assert!(err.to_string().contains("NVD_API_KEY_TEST_UNSET"));
    }

    #[test]
    fn live_mode_resolves_set_key() {
        std::env::set_var("V2E_TEST_SECRET_KEY", "s3cr3t");
        let config = json!({ "providers": { "nvd": { "api_key_env": "V2E_TEST_SECRET_KEY" } } });
        let secrets = resolve_secrets_for_mode(&config, RunMode::Live).unwrap();
        assert_eq!(secrets.api_key("nvd"), Some("s3cr3t"));
        std::env::remove_var("V2E_TEST_SECRET_KEY");
    }

    #[test]
    fn debug_redacts_values() {
        std::env::set_var("V2E_TEST_SECRET_KEY_2", "s3cr3t");
        let config = json!({ "providers": { "nvd": { "api_key_env": "V2E_TEST_SECRET_KEY_2" } } });
        let secrets = resolve_secrets_for_mode(&config, RunMode::Live).unwrap();
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("s3cr3t"));
        std::env::remove_var("V2E_TEST_SECRET_KEY_2");
    }

    #[test]
    fn provider_without_api_key_env_pointer_is_skipped() {
        let config = json!({ "providers": { "nvd": {} } });
        let secrets = resolve_secrets_for_mode(&config, RunMode::Demo).unwrap();
        assert!(secrets.api_key("nvd").is_none());
    }
}
