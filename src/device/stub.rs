//! File-based stand-ins for the device tools.
//!
//! Stub clips are plain text: the camera writes one line per still, the
//! encoder concatenates stills in sequence order and the merger concatenates
//! clips in input order. A daily stub clip therefore lists every frame that
//! went into it, in order.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ClipEncoder, ClipMerger, Indicator, StillCamera};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StubCall {
    Capture(PathBuf),
    Encode {
        stills_dir: PathBuf,
        count: usize,
        output: PathBuf,
    },
    Merge {
        inputs: Vec<PathBuf>,
        output: PathBuf,
    },
    Indicator(bool),
}

/// Shared, ordered record of every stub call.
#[derive(Clone, Debug, Default)]
pub struct StubLog {
    calls: Arc<Mutex<Vec<StubCall>>>,
}

impl StubLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: StubCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn captures(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Capture(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn encodes(&self) -> Vec<(PathBuf, usize, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Encode {
                    stills_dir,
                    count,
                    output,
                } => Some((stills_dir, count, output)),
                _ => None,
            })
            .collect()
    }

    pub fn merges(&self) -> Vec<(Vec<PathBuf>, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Merge { inputs, output } => Some((inputs, output)),
                _ => None,
            })
            .collect()
    }

    pub fn indicator_states(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StubCall::Indicator(on) => Some(on),
                _ => None,
            })
            .collect()
    }
}

pub struct StubCamera {
    log: StubLog,
    frames: u64,
}

impl StubCamera {
    pub fn new(log: StubLog) -> Self {
        Self { log, frames: 0 }
    }
}

impl StillCamera for StubCamera {
    fn capture(&mut self, output: &Path) -> Result<()> {
        fs::write(output, format!("frame {}\n", self.frames))
            .with_context(|| format!("failed to write {}", output.display()))?;
        self.frames += 1;
        self.log.push(StubCall::Capture(output.to_path_buf()));
        Ok(())
    }
}

pub struct StubEncoder {
    log: StubLog,
}

impl StubEncoder {
    pub fn new(log: StubLog) -> Self {
        Self { log }
    }
}

impl ClipEncoder for StubEncoder {
    fn encode(&mut self, stills_dir: &Path, count: usize, output: &Path) -> Result<()> {
        self.log.push(StubCall::Encode {
            stills_dir: stills_dir.to_path_buf(),
            count,
            output: output.to_path_buf(),
        });
        let mut clip = Vec::new();
        for number in 0..count {
            let still = stills_dir.join(format!("{}.jpg", number));
            let bytes = fs::read(&still)
                .with_context(|| format!("sequence broken at {}", still.display()))?;
            clip.extend_from_slice(&bytes);
        }
        fs::write(output, clip).with_context(|| format!("failed to write {}", output.display()))
    }
}

pub struct StubMerger {
    log: StubLog,
    fail: bool,
}

impl StubMerger {
    pub fn new(log: StubLog) -> Self {
        Self { log, fail: false }
    }

    /// A merger that leaves a partial output behind and then fails.
    pub fn failing(log: StubLog) -> Self {
        Self { log, fail: true }
    }
}

impl ClipMerger for StubMerger {
    fn merge(&mut self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        self.log.push(StubCall::Merge {
            inputs: inputs.to_vec(),
            output: output.to_path_buf(),
        });
        if self.fail {
            fs::write(output, b"truncated")
                .with_context(|| format!("failed to write {}", output.display()))?;
            return Err(anyhow!("stub merger failure"));
        }
        let mut clip = Vec::new();
        for input in inputs {
            clip.extend(fs::read(input).with_context(|| format!("failed to read {}", input.display()))?);
        }
        fs::write(output, clip).with_context(|| format!("failed to write {}", output.display()))
    }
}

pub struct StubIndicator {
    log: StubLog,
}

impl StubIndicator {
    pub fn new(log: StubLog) -> Self {
        Self { log }
    }
}

impl Indicator for StubIndicator {
    fn set(&mut self, on: bool) -> Result<()> {
        self.log.push(StubCall::Indicator(on));
        Ok(())
    }
}

/// Indicator for boards without a usable LED.
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn set(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }
}
