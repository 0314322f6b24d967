//! External collaborators: camera, encoder, merger and indicator light.
//!
//! The pipeline only sequences these operations and keeps the books; the
//! actual capture and video work happens behind the traits below.
//!
//! - `command`: the device build, shelling out to raspistill, gst-launch-1.0,
//!   avimerge and gpio
//! - `stub`: file-based stand-ins for tests and dry runs off-device

pub mod command;
pub mod stub;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::{DeviceBackendKind, LedSettings, TimelapseConfig};

pub use command::{AviMerger, GpioIndicator, GstreamerEncoder, Raspistill};
pub use stub::{
    NoopIndicator, StubCall, StubCamera, StubEncoder, StubIndicator, StubLog, StubMerger,
};

/// Captures one still image.
pub trait StillCamera: Send {
    fn capture(&mut self, output: &Path) -> Result<()>;
}

/// Encodes a directory of `0.jpg .. <count-1>.jpg` into one clip.
pub trait ClipEncoder: Send {
    fn encode(&mut self, stills_dir: &Path, count: usize, output: &Path) -> Result<()>;
}

/// Concatenates clips, in the given order, into one clip.
pub trait ClipMerger: Send {
    fn merge(&mut self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// Indicator light shown while a capture is in progress.
pub trait Indicator: Send {
    fn set(&mut self, on: bool) -> Result<()>;
}

/// The full set of collaborators the daemon runs with.
pub struct Devices {
    pub camera: Box<dyn StillCamera>,
    pub encoder: Box<dyn ClipEncoder>,
    pub merger: Box<dyn ClipMerger>,
    pub indicator: Box<dyn Indicator>,
    pub led_supported: bool,
}

impl Devices {
    /// Builds the collaborators selected by `cfg.backend`.
    pub fn from_config(cfg: &TimelapseConfig) -> Result<Self> {
        match cfg.backend {
            DeviceBackendKind::Command => {
                let (indicator, led_supported) = command_indicator(&cfg.led);
                Ok(Self {
                    camera: Box::new(Raspistill::new(cfg.camera.clone())),
                    encoder: Box::new(GstreamerEncoder::new(cfg.encoder.clone())),
                    merger: Box::new(AviMerger::new(cfg.merger.clone())),
                    indicator,
                    led_supported,
                })
            }
            DeviceBackendKind::Stub => Ok(Self::stub(&StubLog::default())),
        }
    }

    /// Stub collaborators that all record into `log`.
    pub fn stub(log: &StubLog) -> Self {
        Self {
            camera: Box::new(StubCamera::new(log.clone())),
            encoder: Box::new(StubEncoder::new(log.clone())),
            merger: Box::new(StubMerger::new(log.clone())),
            indicator: Box::new(StubIndicator::new(log.clone())),
            led_supported: true,
        }
    }
}

fn command_indicator(settings: &LedSettings) -> (Box<dyn Indicator>, bool) {
    if !settings.enabled {
        return (Box::new(NoopIndicator), false);
    }
    if !program_in_path(&settings.program) {
        log::warn!(
            "led: '{}' not found in PATH, indicator disabled",
            settings.program
        );
        return (Box::new(NoopIndicator), false);
    }
    match GpioIndicator::new(settings) {
        Ok(indicator) => (Box::new(indicator), true),
        Err(err) => {
            log::warn!("led: gpio setup failed, indicator disabled: {:#}", err);
            (Box::new(NoopIndicator), false)
        }
    }
}

/// Whether `program` resolves to a file on `PATH` (or is itself a path).
pub fn program_in_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_programs_by_path() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let program = temp_dir.path().join("gpio");
        std::fs::write(&program, b"#!/bin/sh\n")?;
        assert!(program_in_path(&program.display().to_string()));
        assert!(!program_in_path(
            &temp_dir.path().join("missing").display().to_string()
        ));
        assert!(!program_in_path("definitely-not-a-real-program-name"));
        Ok(())
    }
}
