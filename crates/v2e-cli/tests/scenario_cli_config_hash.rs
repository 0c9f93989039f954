use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;

#[test]
fn config_hash_is_stable_across_key_reordering() -> anyhow::Result<()> {
    let mut a = tempfile::NamedTempFile::new()?;
    write!(a, "providers:\n  nvd:\n    batch_size: 50\nstore: {{}}\n")?;
    let mut b = tempfile::NamedTempFile::new()?;
    write!(b, "store: {{}}\nproviders:\n  nvd:\n    batch_size: 50\n")?;

    let mut cmd_a = assert_cmd::Command::cargo_bin("v2e")?;
    let out_a = cmd_a.args(["config", "hash"]).arg(a.path()).output()?;
    assert!(out_a.status.success());
    let stdout_a = String::from_utf8(out_a.stdout)?;

    let mut cmd_b = assert_cmd::Command::cargo_bin("v2e")?;
    let out_b = cmd_b.args(["config", "hash"]).arg(b.path()).output()?;
    assert!(out_b.status.success());
    let stdout_b = String::from_utf8(out_b.stdout)?;

    let hash_a = stdout_a.lines().next().unwrap();
    let hash_b = stdout_b.lines().next().unwrap();
    assert_eq!(hash_a, hash_b);
    assert!(hash_a.starts_with("config_hash="));

    Ok(())
}

#[test]
fn config_hash_requires_at_least_one_path() -> anyhow::Result<()> {
    let mut cmd = assert_cmd::Command::cargo_bin("v2e")?;
    cmd.args(["config", "hash"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required"));

    Ok(())
}
