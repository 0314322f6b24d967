use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn run_once(root: &Path) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_timelapsed"));
    for key in [
        "TIMELAPSE_CONFIG",
        "TIMELAPSE_ROOT",
        "TIMELAPSE_TICK_SECS",
        "TIMELAPSE_BACKEND",
        "TIMELAPSE_LED",
        "TIMELAPSE_CLIP_EXT",
    ] {
        command.env_remove(key);
    }
    command
        .arg("--once")
        .arg("--backend")
        .arg("stub")
        .arg("--root")
        .arg(root)
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run timelapsed")
}

#[test]
fn single_tick_captures_one_still() {
    let root = tempfile::tempdir().expect("temp root");

    let output = run_once(root.path());

    assert!(
        output.status.success(),
        "timelapsed failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        fs::read_to_string(root.path().join("bucket_stills/0.jpg")).expect("still"),
        "frame 0\n"
    );
}

#[test]
fn leftover_snapshot_is_encoded_before_exit() {
    let root = tempfile::tempdir().expect("temp root");
    let snapshot = root.path().join("bucket_stills_temp_2020-01-01_10-00");
    fs::create_dir_all(&snapshot).expect("snapshot dir");
    fs::write(snapshot.join("0.jpg"), "left over\n").expect("still");

    let output = run_once(root.path());

    assert!(
        output.status.success(),
        "timelapsed failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(!snapshot.exists());
    assert_eq!(
        fs::read_to_string(root.path().join("bucket_5min/2020-01-01_10-00.avi")).expect("clip"),
        "left over\n"
    );
}

#[test]
fn collision_on_disk_exits_non_zero_and_keeps_files() {
    let root = tempfile::tempdir().expect("temp root");
    let snapshot = root.path().join("bucket_stills_temp_2020-01-01_10-00");
    fs::create_dir_all(&snapshot).expect("snapshot dir");
    fs::write(snapshot.join("0.jpg"), "new\n").expect("still");
    let clip = root.path().join("bucket_5min/2020-01-01_10-00.avi");
    fs::create_dir_all(clip.parent().expect("clip dir")).expect("clip dir");
    fs::write(&clip, "old\n").expect("clip");

    let output = run_once(root.path());

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read_to_string(snapshot.join("0.jpg")).expect("still"), "new\n");
    assert_eq!(fs::read_to_string(&clip).expect("clip"), "old\n");
}
