//! Command-line device backends used on the Raspberry Pi build.
//!
//! Each operation runs the tool to completion and captures its combined
//! stdout/stderr. A non-zero exit is returned as an error carrying that
//! output; nothing here retries.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::{ClipEncoder, ClipMerger, Indicator, StillCamera};
use crate::config::{CameraSettings, EncoderSettings, LedSettings, MergerSettings};

/// Runs `program` with `args`, failing with its combined output on a non-zero exit.
pub fn run_command(program: &str, args: &[String]) -> Result<()> {
    log::info!("invoking {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to start {}", program))?;
    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    log::error!("{} exited with {}:\n{}", program, output.status, combined.trim_end());
    Err(anyhow!(
        "{} exited with {}: {}",
        program,
        output.status,
        combined.trim()
    ))
}

/// `raspistill` still capture.
pub struct Raspistill {
    settings: CameraSettings,
}

impl Raspistill {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }

    fn args(&self, output: &Path) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.settings.warmup_ms.to_string(),
            "-w".to_string(),
            self.settings.width.to_string(),
            "-h".to_string(),
            self.settings.height.to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]
    }
}

impl StillCamera for Raspistill {
    fn capture(&mut self, output: &Path) -> Result<()> {
        run_command(&self.settings.program, &self.args(output))
    }
}

/// GStreamer pipeline encoding a numbered JPEG sequence into an AVI clip.
pub struct GstreamerEncoder {
    settings: EncoderSettings,
}

impl GstreamerEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    fn args(&self, stills_dir: &Path, output: &Path) -> Vec<String> {
        vec![
            "multifilesrc".to_string(),
            format!("location={}/%d.jpg", stills_dir.display()),
            "index=0".to_string(),
            format!("caps=image/jpeg,framerate={}/1", self.settings.framerate),
            "!".to_string(),
            "jpegdec".to_string(),
            "!".to_string(),
            self.settings.element.clone(),
            "!".to_string(),
            "avimux".to_string(),
            "!".to_string(),
            "filesink".to_string(),
            format!("location={}", output.display()),
        ]
    }
}

impl ClipEncoder for GstreamerEncoder {
    fn encode(&mut self, stills_dir: &Path, count: usize, output: &Path) -> Result<()> {
        log::debug!("encoder: {} stills from {}", count, stills_dir.display());
        run_command(&self.settings.program, &self.args(stills_dir, output))
    }
}

/// `avimerge` clip concatenation (transcode package).
pub struct AviMerger {
    settings: MergerSettings,
}

impl AviMerger {
    pub fn new(settings: MergerSettings) -> Self {
        Self { settings }
    }

    fn args(&self, inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = vec!["-o".to_string(), output.display().to_string()];
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args
    }
}

impl ClipMerger for AviMerger {
    fn merge(&mut self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        run_command(&self.settings.program, &self.args(inputs, output))
    }
}

/// Power LED driven through WiringPi's `gpio` tool.
///
/// The LED is active-low: writing 0 turns it on. Writes are fired without
/// waiting; finished children are reaped on the next call.
pub struct GpioIndicator {
    program: String,
    pin: u8,
    children: Vec<Child>,
}

impl GpioIndicator {
    /// Switches the pin to output mode.
    pub fn new(settings: &LedSettings) -> Result<Self> {
        run_command(
            &settings.program,
            &[
                "-g".to_string(),
                "mode".to_string(),
                settings.gpio_pin.to_string(),
                "output".to_string(),
            ],
        )?;
        Ok(Self {
            program: settings.program.clone(),
            pin: settings.gpio_pin,
            children: Vec::new(),
        })
    }
}

impl Indicator for GpioIndicator {
    fn set(&mut self, on: bool) -> Result<()> {
        self.children
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        let bit = if on { "0" } else { "1" };
        let pin = self.pin.to_string();
        let child = Command::new(&self.program)
            .args(["-g", "write", pin.as_str(), bit])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        self.children.push(child);
        Ok(())
    }
}
