//! Command-line behaviour.

use assert_cmd::Command;
use predicates::prelude::*;
use snapslot_core::archive::tar_stream::write_tar;
use snapslot_core::Fingerprint;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn snapslot(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("snapslot").unwrap();
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

/// Config for a local-directory remote under `dir`.
fn local_config(dir: &Path) -> std::io::Result<std::path::PathBuf> {
    fs::create_dir_all(dir.join("remote"))?;
    fs::write(dir.join("passphrase"), "correct horse\n")?;
    let path = dir.join("snapslot.toml");
    fs::write(
        &path,
        format!(
            r#"
[remote]
kind = "local"
path = "{remote}"

[secrets]
passphrase_file = "{secret}"
"#,
            remote = dir.join("remote").display(),
            secret = dir.join("passphrase").display(),
        ),
    )?;
    Ok(path)
}

#[test]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().unwrap();
    snapslot(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("download"));
}

#[test]
fn test_config_prints_effective_toml() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_config(temp_dir.path()).unwrap();

    snapslot(temp_dir.path())
        .args(["config", "--config"])
        .arg(&config)
        .env("SNAPSLOT__REMOTE__ROOT", "snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains("kind = \"local\""))
        .stdout(predicate::str::contains("root = \"snapshots\""))
        .stdout(predicate::str::contains("mode = \"probe\""));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    snapslot(temp_dir.path())
        .args(["config", "--config", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn test_fingerprint_matches_tar_encoding() {
    let temp_dir = TempDir::new().unwrap();
    let photos = temp_dir.path().join("photos");
    fs::create_dir_all(photos.join("2023")).unwrap();
    fs::write(photos.join("2023/beach.jpg"), vec![9u8; 10_000]).unwrap();

    let expected = Fingerprint::of_bytes(&write_tar(&photos, Vec::new()).unwrap());

    snapslot(temp_dir.path())
        .arg("fingerprint")
        .arg(&photos)
        .assert()
        .success()
        .stdout(format!("{}  photos.tar\n", expected));
}

#[test]
fn test_run_without_passphrase_fails_before_remote_access() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_config(temp_dir.path()).unwrap();
    fs::remove_file(temp_dir.path().join("passphrase")).unwrap();

    snapslot(temp_dir.path())
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("passphrase"));

    assert!(fs::read_dir(temp_dir.path().join("remote"))
        .unwrap()
        .next()
        .is_none());
}

#[test]
fn test_run_rejects_unknown_mode() {
    let temp_dir = TempDir::new().unwrap();
    snapslot(temp_dir.path())
        .args(["run", "--mode", "fast"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown pipeline mode"));
}

#[test]
fn test_setup_then_inspect_local_remote() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_config(temp_dir.path()).unwrap();

    snapslot(temp_dir.path())
        .arg("setup")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup root backups ready"));
    assert!(temp_dir.path().join("remote/backups").is_dir());

    snapslot(temp_dir.path())
        .args(["inspect", "--json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn test_lookup_rejects_malformed_fingerprint() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_config(temp_dir.path()).unwrap();

    snapslot(temp_dir.path())
        .args(["lookup", "photos.tar", "xyz", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid fingerprint"));
}

#[test]
fn test_lookup_on_empty_remote() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_config(temp_dir.path()).unwrap();
    fs::create_dir_all(temp_dir.path().join("remote/backups")).unwrap();

    snapslot(temp_dir.path())
        .args(["lookup", "photos.tar", &"a".repeat(64), "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is not stored"));
}
