use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use timelapse_buckets::config::{DeviceBackendKind, TimelapseConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TIMELAPSE_CONFIG",
        "TIMELAPSE_ROOT",
        "TIMELAPSE_TICK_SECS",
        "TIMELAPSE_BACKEND",
        "TIMELAPSE_LED",
        "TIMELAPSE_CLIP_EXT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_device_build() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TimelapseConfig::load().expect("load config");

    assert_eq!(cfg.root, PathBuf::from("/home/pi/timelapse"));
    assert_eq!(cfg.tick.as_secs(), 5);
    assert_eq!(cfg.clip_extension, "avi");
    assert_eq!(cfg.queue_capacity, 2);
    assert_eq!(cfg.backend, DeviceBackendKind::Command);
    assert_eq!(cfg.camera.program, "raspistill");
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 960);
    assert_eq!(cfg.encoder.framerate, 24);
    assert_eq!(cfg.merger.program, "avimerge");
    assert!(cfg.led.enabled);
    assert_eq!(cfg.led.gpio_pin, 16);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
            "root": "/srv/timelapse",
            "tick_secs": 10,
            "clip_extension": "mkv",
            "queue_capacity": 1,
            "camera": {
                "width": 1920,
                "height": 1440,
                "warmup_ms": 500
            },
            "encoder": {
                "framerate": 12,
                "element": "x264enc"
            },
            "led": {
                "gpio_pin": 20
            }
        }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TIMELAPSE_CONFIG", file.path());
    std::env::set_var("TIMELAPSE_TICK_SECS", "3");
    std::env::set_var("TIMELAPSE_BACKEND", "stub");
    std::env::set_var("TIMELAPSE_LED", "off");

    let cfg = TimelapseConfig::load().expect("load config");

    assert_eq!(cfg.root, PathBuf::from("/srv/timelapse"));
    assert_eq!(cfg.tick.as_secs(), 3);
    assert_eq!(cfg.clip_extension, "mkv");
    assert_eq!(cfg.queue_capacity, 1);
    assert_eq!(cfg.backend, DeviceBackendKind::Stub);
    assert_eq!(cfg.camera.width, 1920);
    assert_eq!(cfg.camera.height, 1440);
    assert_eq!(cfg.camera.warmup_ms, 500);
    assert_eq!(cfg.camera.program, "raspistill");
    assert_eq!(cfg.encoder.framerate, 12);
    assert_eq!(cfg.encoder.element, "x264enc");
    assert!(!cfg.led.enabled);
    assert_eq!(cfg.led.gpio_pin, 20);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
root = "/mnt/usb/timelapse"
backend = "stub"

[merger]
program = "/usr/local/bin/avimerge"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = TimelapseConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.root, PathBuf::from("/mnt/usb/timelapse"));
    assert_eq!(cfg.backend, DeviceBackendKind::Stub);
    assert_eq!(cfg.merger.program, "/usr/local/bin/avimerge");
    assert_eq!(cfg.tick.as_secs(), 5);
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TIMELAPSE_TICK_SECS", "0");
    assert!(TimelapseConfig::load().is_err());
    std::env::set_var("TIMELAPSE_TICK_SECS", "five");
    assert!(TimelapseConfig::load().is_err());
    clear_env();

    std::env::set_var("TIMELAPSE_LED", "sometimes");
    assert!(TimelapseConfig::load().is_err());
    clear_env();

    std::env::set_var("TIMELAPSE_CLIP_EXT", "part");
    assert!(TimelapseConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"backend": "ffmpeg"}"#).expect("write config");
    assert!(TimelapseConfig::load_from(Some(file.path())).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{not json").expect("write config");
    assert!(TimelapseConfig::load_from(Some(file.path())).is_err());
}
