use std::io::Write;

use v2e_config::load_layered_yaml;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, "{contents}").unwrap();
    f
}

const BASE_YAML: &str = r#"
store:
  path: "session.db"
providers:
  nvd:
    batch_size: 100
    api_key_env: "NVD_API_KEY"
"#;

const BASE_YAML_REORDERED: &str = r#"
providers:
  nvd:
    api_key_env: "NVD_API_KEY"
    batch_size: 100
store:
  path: "session.db"
"#;

const OVERLAY_YAML: &str = r#"
providers:
  nvd:
    batch_size: 250
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a_file = write_temp(BASE_YAML);
    let a = load_layered_yaml(&[a_file.path()]).unwrap();
    let b = load_layered_yaml(&[a_file.path()]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let base = write_temp(BASE_YAML);
    let reordered = write_temp(BASE_YAML_REORDERED);
    let a = load_layered_yaml(&[base.path()]).unwrap();
    let b = load_layered_yaml(&[reordered.path()]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn overlay_overrides_base_and_changes_hash() {
    let base = write_temp(BASE_YAML);
    let overlay = write_temp(OVERLAY_YAML);
    let unmerged = load_layered_yaml(&[base.path()]).unwrap();
    let merged = load_layered_yaml(&[base.path(), overlay.path()]).unwrap();

    assert_ne!(unmerged.config_hash, merged.config_hash);
    assert_eq!(
        merged.config_json.pointer("/providers/nvd/batch_size"),
        Some(&serde_json::Value::from(250))
    );
    // untouched sibling key survives the merge
    assert_eq!(
        merged.config_json.pointer("/providers/nvd/api_key_env"),
        Some(&serde_json::Value::from("NVD_API_KEY"))
    );
}

#[test]
fn hash_is_64_hex_chars() {
    let base = write_temp(BASE_YAML);
    let loaded = load_layered_yaml(&[base.path()]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
