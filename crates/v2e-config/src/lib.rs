//! Layered YAML configuration: load, deep-merge, canonicalize, hash.
//!
//! Config keys cover the store path, per-provider tuning (`batch_size`,
//! `max_retries`, `retry_delay_ms`, `checkpoint_interval`,
//! `failure_threshold`), parallel-pool `workers` counts, event-bus
//! capacities, and a `providers.<id>.api_key_env` pointer resolved by
//! [`secrets::resolve_secrets_for_mode`].

pub mod provider_modes;
pub mod secrets;

pub use provider_modes::RunMode;
pub use secrets::ResolvedSecrets;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Loads and deep-merges YAML files in order (later overrides earlier), then
/// canonicalizes to JSON and hashes the canonical bytes with SHA-256.
pub fn load_layered_yaml(paths: &[impl AsRef<Path>]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let p = p.as_ref();
        let s = fs::read_to_string(p)
            .with_context(|| format!("read config: {}", p.display()))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {}", p.display()))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Per-provider tuning pulled out of `config_json` at `/providers/<id>`, with
/// the defaults named in `spec.md` §4.2/§4.4 if the pointer is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderTuning {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub checkpoint_interval: u64,
    pub failure_threshold: f64,
}

impl Default for ProviderTuning {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 5_000,
            checkpoint_interval: 100,
            failure_threshold: 0.1,
        }
    }
}

pub fn provider_tuning(config_json: &Value, provider_id: &str) -> ProviderTuning {
    let default = ProviderTuning::default();
    let node = config_json.pointer(&format!("/providers/{provider_id}"));

    ProviderTuning {
        batch_size: node
            .and_then(|n| n.get("batch_size"))
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default.batch_size),
        max_retries: node
            .and_then(|n| n.get("max_retries"))
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(default.max_retries),
        retry_delay_ms: node
            .and_then(|n| n.get("retry_delay_ms"))
            .and_then(Value::as_u64)
            .unwrap_or(default.retry_delay_ms),
        checkpoint_interval: node
            .and_then(|n| n.get("checkpoint_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(default.checkpoint_interval),
        failure_threshold: node
            .and_then(|n| n.get("failure_threshold"))
            .and_then(Value::as_f64)
            .unwrap_or(default.failure_threshold),
    }
}

/// Objects merge recursively; arrays and scalars are overwritten wholesale.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn later_files_override_earlier_on_scalars() {
        let base = write_temp("providers:\n  nvd:\n    batch_size: 50\n");
        let overlay = write_temp("providers:\n  nvd:\n    batch_size: 200\n");
        let loaded = load_layered_yaml(&[base.path(), overlay.path()]).unwrap();
        assert_eq!(
            loaded.config_json.pointer("/providers/nvd/batch_size"),
            Some(&Value::from(200))
        );
    }

    #[test]
    fn deep_merge_preserves_sibling_keys() {
        let base = write_temp("providers:\n  nvd:\n    batch_size: 50\n");
        let overlay = write_temp("providers:\n  nvd:\n    max_retries: 5\n");
        let loaded = load_layered_yaml(&[base.path(), overlay.path()]).unwrap();
        assert_eq!(
            loaded.config_json.pointer("/providers/nvd/batch_size"),
            Some(&Value::from(50))
        );
        assert_eq!(
            loaded.config_json.pointer("/providers/nvd/max_retries"),
            Some(&Value::from(5))
        );
    }

    #[test]
    fn hash_is_stable_across_key_reordering() {
        let a = write_temp("a: 1\nb: 2\n");
        let b = write_temp("b: 2\na: 1\n");
        let loaded_a = load_layered_yaml(&[a.path()]).unwrap();
        let loaded_b = load_layered_yaml(&[b.path()]).unwrap();
        assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
    }

    #[test]
    fn provider_tuning_falls_back_to_defaults() {
        let tuning = provider_tuning(&Value::Null, "nvd");
        assert_eq!(tuning, ProviderTuning::default());
    }

    #[test]
    fn provider_tuning_reads_overrides() {
        let config = serde_json::json!({
            "providers": { "nvd": { "batch_size": 25, "failure_threshold": 0.1 } }
        });
        let tuning = provider_tuning(&config, "nvd");
        assert_eq!(tuning.batch_size, 25);
        assert_eq!(tuning.failure_threshold, 0.1);
        assert_eq!(tuning.max_retries, ProviderTuning::default().max_retries);
    }
}
