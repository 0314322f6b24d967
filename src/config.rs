use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ROOT: &str = "/home/pi/timelapse";
const DEFAULT_TICK_SECS: u64 = 5;
const DEFAULT_CLIP_EXTENSION: &str = "avi";
const DEFAULT_QUEUE_CAPACITY: usize = 2;
const DEFAULT_CAMERA_PROGRAM: &str = "raspistill";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 960;
const DEFAULT_CAMERA_WARMUP_MS: u64 = 1000;
const DEFAULT_ENCODER_PROGRAM: &str = "gst-launch-1.0";
const DEFAULT_ENCODER_FRAMERATE: u32 = 24;
const DEFAULT_ENCODER_ELEMENT: &str = "omxh264enc";
const DEFAULT_MERGER_PROGRAM: &str = "avimerge";
const DEFAULT_LED_PROGRAM: &str = "gpio";
const DEFAULT_LED_PIN: u8 = 16;

#[derive(Debug, Deserialize, Default)]
struct TimelapseConfigFile {
    root: Option<PathBuf>,
    tick_secs: Option<u64>,
    clip_extension: Option<String>,
    queue_capacity: Option<usize>,
    backend: Option<String>,
    camera: Option<CameraConfigFile>,
    encoder: Option<EncoderConfigFile>,
    merger: Option<MergerConfigFile>,
    led: Option<LedConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    program: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    warmup_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EncoderConfigFile {
    program: Option<String>,
    framerate: Option<u32>,
    element: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MergerConfigFile {
    program: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LedConfigFile {
    enabled: Option<bool>,
    gpio_pin: Option<u8>,
    program: Option<String>,
}

/// Which implementation of the device tools to run with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceBackendKind {
    Command,
    Stub,
}

impl DeviceBackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!(
                "unknown backend '{}' (expected 'command' or 'stub')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelapseConfig {
    pub root: PathBuf,
    pub tick: Duration,
    pub clip_extension: String,
    pub queue_capacity: usize,
    pub backend: DeviceBackendKind,
    pub camera: CameraSettings,
    pub encoder: EncoderSettings,
    pub merger: MergerSettings,
    pub led: LedSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub warmup_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_CAMERA_PROGRAM.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            warmup_ms: DEFAULT_CAMERA_WARMUP_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub program: String,
    pub framerate: u32,
    /// GStreamer H.264 encoder element.
    pub element: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENCODER_PROGRAM.to_string(),
            framerate: DEFAULT_ENCODER_FRAMERATE,
            element: DEFAULT_ENCODER_ELEMENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergerSettings {
    pub program: String,
}

impl Default for MergerSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_MERGER_PROGRAM.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedSettings {
    pub enabled: bool,
    pub gpio_pin: u8,
    pub program: String,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            gpio_pin: DEFAULT_LED_PIN,
            program: DEFAULT_LED_PROGRAM.to_string(),
        }
    }
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
            clip_extension: DEFAULT_CLIP_EXTENSION.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backend: DeviceBackendKind::Command,
            camera: CameraSettings::default(),
            encoder: EncoderSettings::default(),
            merger: MergerSettings::default(),
            led: LedSettings::default(),
        }
    }
}

impl TimelapseConfig {
    /// Loads `TIMELAPSE_CONFIG` (if set), then applies env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TIMELAPSE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Loads an explicit config file (JSON, or TOML for `.toml`), then env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TimelapseConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let backend = match file.backend.as_deref() {
            Some(value) => DeviceBackendKind::parse(value)?,
            None => defaults.backend,
        };
        let camera = file.camera.unwrap_or_default();
        let encoder = file.encoder.unwrap_or_default();
        let merger = file.merger.unwrap_or_default();
        let led = file.led.unwrap_or_default();
        Ok(Self {
            root: file.root.unwrap_or(defaults.root),
            tick: file
                .tick_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick),
            clip_extension: file.clip_extension.unwrap_or(defaults.clip_extension),
            queue_capacity: file.queue_capacity.unwrap_or(defaults.queue_capacity),
            backend,
            camera: CameraSettings {
                program: camera.program.unwrap_or(defaults.camera.program),
                width: camera.width.unwrap_or(defaults.camera.width),
                height: camera.height.unwrap_or(defaults.camera.height),
                warmup_ms: camera.warmup_ms.unwrap_or(defaults.camera.warmup_ms),
            },
            encoder: EncoderSettings {
                program: encoder.program.unwrap_or(defaults.encoder.program),
                framerate: encoder.framerate.unwrap_or(defaults.encoder.framerate),
                element: encoder.element.unwrap_or(defaults.encoder.element),
            },
            merger: MergerSettings {
                program: merger.program.unwrap_or(defaults.merger.program),
            },
            led: LedSettings {
                enabled: led.enabled.unwrap_or(defaults.led.enabled),
                gpio_pin: led.gpio_pin.unwrap_or(defaults.led.gpio_pin),
                program: led.program.unwrap_or(defaults.led.program),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("TIMELAPSE_ROOT") {
            if !root.trim().is_empty() {
                self.root = PathBuf::from(root);
            }
        }
        if let Ok(tick) = std::env::var("TIMELAPSE_TICK_SECS") {
            let seconds: u64 = tick.trim().parse().map_err(|_| {
                anyhow!("TIMELAPSE_TICK_SECS must be an integer number of seconds")
            })?;
            self.tick = Duration::from_secs(seconds);
        }
        if let Ok(backend) = std::env::var("TIMELAPSE_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = DeviceBackendKind::parse(&backend)?;
            }
        }
        if let Ok(led) = std::env::var("TIMELAPSE_LED") {
            self.led.enabled = parse_switch(&led)
                .ok_or_else(|| anyhow!("TIMELAPSE_LED must be on/off, true/false or 1/0"))?;
        }
        if let Ok(ext) = std::env::var("TIMELAPSE_CLIP_EXT") {
            if !ext.trim().is_empty() {
                self.clip_extension = ext.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(anyhow!("tick must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be at least 1"));
        }
        self.clip_extension = self.clip_extension.trim_start_matches('.').to_string();
        if self.clip_extension.is_empty()
            || self
                .clip_extension
                .contains(|c: char| c == '.' || c == '/' || c == '\\')
        {
            return Err(anyhow!(
                "clip_extension must be a bare extension such as 'avi'"
            ));
        }
        if self.clip_extension == crate::store::PARTIAL_EXTENSION {
            return Err(anyhow!("clip_extension may not be 'part'"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.encoder.framerate == 0 {
            return Err(anyhow!("encoder framerate must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TimelapseConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}
