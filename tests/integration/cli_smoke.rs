#![allow(missing_docs)]

use assert_cmd::Command;
use tempfile::TempDir;

fn command(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("casita").expect("binary");
    cmd.env("CASITA_DATA_DIR", dir.path().join("state"))
        .env("CASITA_IMAGES_DIR", dir.path().join("processed"))
        .env("CASITA_REPORTS_DIR", dir.path().join("reports"))
        .env_remove("ASSESSOR_API_TOKEN")
        .env_remove("CASITA_PROXY")
        .env_remove("HTTPS_PROXY")
        .env_remove("HTTP_PROXY")
        .arg("--log")
        .arg("warn");
    cmd
}

#[test]
fn help_lists_the_batch_surface() {
    let dir = TempDir::new().expect("tmpdir");
    let assert = command(&dir).arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for needle in ["--all", "--test", "--strict", "--skip-phase", "--fresh", "validate"] {
        assert!(stdout.contains(needle), "help missing {needle}");
    }
}

#[test]
fn no_selection_is_a_usage_error() {
    let dir = TempDir::new().expect("tmpdir");
    std::fs::write(
        dir.path().join("properties.csv"),
        "street,city,state,zip,price,price_num,beds,baths,sqft,price_per_sqft,full_address\n",
    )
    .unwrap();
    command(&dir)
        .arg("--csv")
        .arg(dir.path().join("properties.csv"))
        .assert()
        .failure()
        .code(1);
}

#[test]
fn missing_roster_exits_with_corrupt_state_code() {
    let dir = TempDir::new().expect("tmpdir");
    command(&dir)
        .arg("--all")
        .arg("--csv")
        .arg(dir.path().join("nope.csv"))
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unknown_skip_phase_is_rejected() {
    let dir = TempDir::new().expect("tmpdir");
    std::fs::write(
        dir.path().join("properties.csv"),
        "street,city,state,zip,price,price_num,beds,baths,sqft,price_per_sqft,full_address\n\
         1 A St,Phoenix,AZ,85001,$1,1,4,2,1000,1,\"1 A St, Phoenix, AZ 85001\"\n",
    )
    .unwrap();
    command(&dir)
        .arg("--all")
        .arg("--csv")
        .arg(dir.path().join("properties.csv"))
        .arg("--skip-phase")
        .arg("P9_bogus")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn validate_passes_on_fresh_state() {
    let dir = TempDir::new().expect("tmpdir");
    command(&dir).arg("validate").assert().success().code(0);
}
