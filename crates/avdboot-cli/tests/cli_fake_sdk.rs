//! Runs the avdboot binary against a fake Android SDK made of shell scripts

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// SDK whose adb lists `emulator-5556` once the marker file exists
fn fake_sdk(emulator_body: &str) -> TempDir {
    let sdk = TempDir::new().unwrap();
    let marker = sdk.path().join("booted");

    write_script(
        &sdk.path().join("platform-tools/adb"),
        &format!(
            r#"case "$1" in
  devices)
    printf 'List of devices attached\nemulator-5554\tdevice\n'
    if [ -f '{marker}' ]; then printf 'emulator-5556\tdevice\n'; fi
    ;;
  *) ;;
esac"#,
            marker = marker.display()
        ),
    );
    write_script(
        &sdk.path().join("emulator/emulator"),
        &emulator_body.replace("{marker}", &marker.display().to_string()),
    );
    sdk
}

fn avdboot(sdk: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_avdboot"))
        .args(args)
        .arg("--android-home")
        .arg(sdk)
        .env_remove("ANDROID_SDK_ROOT")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_start_prints_serial() {
    let sdk = fake_sdk(
        r#"if [ "$1" = "-version" ]; then echo 'Android emulator version 34.1.9'; exit 0; fi
touch '{marker}'
echo 'INFO    | boot completed'
exec sleep 5"#,
    );
    let serial_file = sdk.path().join("serial.txt");

    let output = avdboot(
        sdk.path(),
        &[
            "start",
            "--emulator-id",
            "ci",
            "--poll-interval",
            "1",
            "--timeout",
            "30",
            "--serial-file",
            serial_file.to_str().unwrap(),
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Android emulator version 34.1.9"));
    assert!(stdout.contains("EMULATOR_SERIAL=emulator-5556"));
    assert_eq!(fs::read_to_string(&serial_file).unwrap().trim(), "emulator-5556");
}

#[test]
fn test_start_fails_after_repeated_faults() {
    let sdk = fake_sdk(
        r#"if [ "$1" = "-version" ]; then exit 0; fi
echo '[    0.8] Kernel panic - not syncing: Attempted to kill init!'
exec sleep 5"#,
    );

    let output = avdboot(
        sdk.path(),
        &["start", "--max-attempts", "2", "--poll-interval", "1", "--timeout", "30"],
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("Emulator log:"));
    assert!(stderr.contains("Kernel panic - not syncing"));
}

#[test]
fn test_devices_as_json() {
    let sdk = fake_sdk("exit 0");

    let output = avdboot(sdk.path(), &["devices", "--json"]);

    assert!(output.status.success());
    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices["emulator-5554"], "device");
    assert!(devices.get("emulator-5556").is_none());
}

#[test]
fn test_invalid_config_exits_with_failure() {
    let sdk = fake_sdk("exit 0");
    let config = sdk.path().join("avdboot.toml");
    fs::write(&config, "[boot]\nmax_attempts = 0\n").unwrap();

    let output = avdboot(
        sdk.path(),
        &["start", "--config", config.to_str().unwrap()],
    );

    assert_eq!(output.status.code(), Some(1));
}
