use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn store_status_reports_zero_providers_on_a_fresh_db() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("session.db");

    let mut cmd = assert_cmd::Command::cargo_bin("v2e")?;
    cmd.args(["store", "status", "--db"]).arg(&db);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("provider_count=0"));

    Ok(())
}

#[test]
fn provider_list_is_empty_on_a_fresh_db() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("session.db");

    let mut cmd = assert_cmd::Command::cargo_bin("v2e")?;
    cmd.args(["provider", "list", "--db"]).arg(&db);

    cmd.assert().success().stdout(predicate::str::is_empty());

    Ok(())
}

#[test]
fn store_status_reuses_the_env_var_default_when_no_flag_is_given() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("via-env.db");

    let mut cmd = assert_cmd::Command::cargo_bin("v2e")?;
    cmd.env("V2E_DB_PATH", &db).args(["store", "status"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("provider_count=0"));

    Ok(())
}
