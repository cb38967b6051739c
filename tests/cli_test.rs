use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn backup() -> Command {
    let mut cmd = Command::cargo_bin("backup").unwrap();
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"))
        .env_remove("BACKUP_LOG");
    cmd
}

#[test]
fn test_valid_descriptor_is_silent_without_verbose() {
    backup()
        .args(["--is-valid", "tests/fixtures/local.yml"])
        .assert()
        .success()
        .stdout("")
        .stderr("");
}

#[test]
fn test_valid_descriptor_message_with_verbose() {
    backup()
        .args(["--is-valid", "-v", "tests/fixtures/remote.yml"])
        .assert()
        .success()
        .stdout("Descriptor file tests/fixtures/remote.yml is valid.\n");
}

#[test]
fn test_schema_violations_are_critical_lines() {
    backup()
        .args(["--is-valid", "tests/fixtures/invalid.yml"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains(
            "[CRITICAL] tests/fixtures/invalid.yml:8:5: sources[1].method: 'zip' is not one of rsync, tar, borg, duplicity, script",
        ));
}

#[test]
fn test_one_critical_line_per_violation() {
    let assert = backup()
        .args(["--is-valid", "tests/fixtures/schema_errors.yml"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(
            "[CRITICAL] tests/fixtures/schema_errors.yml:1:1: method: 'rsnyc' is not one of rsync, tar, borg, duplicity, script\n\
             [CRITICAL] tests/fixtures/schema_errors.yml:4:5: sources[0].sudo: expected true or false\n\
             [CRITICAL] tests/fixtures/schema_errors.yml:5:5: sources[1]: unexpected key 'metod'\n\
             [CRITICAL] tests/fixtures/schema_errors.yml:5:3: sources[1]: missing required key 'path'\n",
        );

    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert_eq!(stderr.lines().count(), 4);
}

#[test]
fn test_semantic_violation_has_location() {
    backup()
        .args(["--is-valid", "tests/fixtures/misplaced_rule.yml"])
        .assert()
        .code(1)
        .stderr(
            "[CRITICAL] tests/fixtures/misplaced_rule.yml:6:7: The pattern rule can only be used with borg.\n",
        );
}

#[test]
fn test_invalid_descriptor_never_runs_a_backup() {
    let target = TempDir::new().unwrap();
    backup()
        .args(["-vv", "tests/fixtures/misplaced_rule.yml"])
        .arg(target.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Command:").not());
}

#[test]
fn test_local_dry_run_output() {
    let scratch = TempDir::new().unwrap();
    let target = scratch.path().join("BACKUPS");

    backup()
        .args(["-v", "--dry-run", "tests/fixtures/local.yml"])
        .arg(&target)
        .assert()
        .success()
        .stdout(format!(
            "Using '{}' as backup target.\nBacking up source /.\nDry run done.\n",
            target.display()
        ))
        .stderr(
            "[WARNING] The given target path does not exist.\n\
             [WARNING] Performing dry run, no changes will be done.\n",
        );
    assert!(!target.exists());
}

#[test]
fn test_verbose_dry_run_renders_commands() {
    let target = TempDir::new().unwrap();
    let files = target.path().join(local_hostname()).join("files");

    backup()
        .args(["-vv", "--dry-run", "tests/fixtures/local.yml"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Command: \"rsync\" \"--delete\" \"--delete-excluded\" \"--stats\" \"--backup-dir={}\" \"-abuchvz\" \"--exclude=/proc\" \"--exclude=/tmp\" \"/\" \"{}\"\nEnv: None\nCwd: None\n",
            target.path().join(local_hostname()).join("backup").display(),
            files.display()
        )));
}

#[test]
fn test_remote_dry_run_mounts_and_runs_scripts() {
    let target = TempDir::new().unwrap();

    let assert = backup()
        .args(["-vv", "--dry-run", "tests/fixtures/remote.yml"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Command: \"sshfs\" \"-F\" \"/home/u/.ssh/config\" \"USER@SERVER:/\""))
        .stdout(predicate::str::contains("Running script 1.\nCommand: \"echo\" \"Hello World\""))
        .stdout(predicate::str::contains("Backing up source / mounted from USER@SERVER."))
        .stdout(predicate::str::contains("::SERVER-{now}\" \".\""))
        .stdout(predicate::str::contains("Running script 2.\nCommand: \"echo\" \"Goodbye!\""))
        .stdout(predicate::str::contains("Command: \"fusermount\" \"-u\""))
        .stdout(predicate::str::ends_with("Dry run done.\n"))
        .stderr(predicate::str::contains("[WARNING] No borg repository found in"));

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let mount = stdout.find("\"sshfs\"").unwrap();
    let script = stdout.find("Running script 1.").unwrap();
    let unmount = stdout.find("\"fusermount\"").unwrap();
    assert!(mount < script && script < unmount);
}

#[test]
fn test_missing_descriptor_fails() {
    backup()
        .arg("tests/fixtures/does-not-exist.yml")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read descriptor file"));
}

#[test]
fn test_usage_error_exit_code() {
    backup().assert().code(2);
}

fn local_hostname() -> String {
    hostname::get().unwrap().into_string().unwrap()
}
