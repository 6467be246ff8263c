use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn fxrender() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_fxrender"));
    command.env_remove("FXRENDER_CONFIG");
    command
}

#[test]
fn print_settings_merges_config_and_overrides() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("fx.toml");
    fs::write(
        &config,
        "[initial.beauty]\nsmooth = 0.5\n\n[initial.styled]\nname = \"wave\"\n",
    )
    .unwrap();

    let output = fxrender()
        .env("FXRENDER_CONFIG", &config)
        .args([
            "--input",
            "unused.png",
            "--output",
            "unused-out.png",
            "--set",
            "whiten=0.25",
            "--set",
            "lut=ziran",
            "--print-settings",
        ])
        .output()
        .expect("failed to run fxrender");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("smooth = 0.5"), "{stdout}");
    assert!(stdout.contains("whiten = 0.25"), "{stdout}");
    assert!(stdout.contains("name = \"ziran\""), "{stdout}");
    assert!(stdout.contains("name = \"wave\""), "{stdout}");
}

#[test]
fn unknown_setting_fails_before_rendering() {
    let output = fxrender()
        .args([
            "--input",
            "missing.png",
            "--output",
            "out.png",
            "--set",
            "sparkle=1",
        ])
        .output()
        .expect("failed to run fxrender");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown setting 'sparkle'"), "{stderr}");
}

#[test]
fn missing_input_is_reported() {
    let root = TempDir::new().unwrap();
    let output = fxrender()
        .args(["--input"])
        .arg(root.path().join("nope.png"))
        .args(["--output"])
        .arg(root.path().join("out.png"))
        .output()
        .expect("failed to run fxrender");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read input image"), "{stderr}");
    assert!(!root.path().join("out.png").exists());
}
