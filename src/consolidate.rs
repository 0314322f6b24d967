//! Consolidation pipeline: stills -> 5-minute clip -> hourly clip -> daily clip.
//!
//! Jobs are queued by the capture loop and run one at a time on a single
//! worker thread. The worker owns the pending clip lists outright, so stage B
//! and C bookkeeping can never interleave between two boundary events.
//!
//! Every output is written to a `.part` file and renamed onto its final name
//! only after the external tool succeeds. A final-named clip on disk is
//! therefore always complete, and a pending-list entry is only added for a
//! published clip.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use crate::bucket::{Crossing, Granularity, TimeBucket};
use crate::device::{ClipEncoder, ClipMerger};
use crate::handoff::Snapshot;
use crate::store::{
    encoded_marker, list_stills, partial_path, publish, BucketLayout, PendingClips,
};

/// One boundary event: a snapshot to encode plus the merges it closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffJob {
    pub snapshot: Snapshot,
    pub crossing: Crossing,
}

impl HandoffJob {
    pub fn label(&self) -> TimeBucket {
        self.snapshot.label
    }
}

/// Artifacts published by one job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub five_min_clip: Option<PathBuf>,
    pub hour_clips: Vec<PathBuf>,
    pub day_clips: Vec<PathBuf>,
}

pub struct Consolidator {
    layout: BucketLayout,
    encoder: Box<dyn ClipEncoder>,
    merger: Box<dyn ClipMerger>,
    pending: PendingClips,
}

impl Consolidator {
    pub fn new(
        layout: BucketLayout,
        encoder: Box<dyn ClipEncoder>,
        merger: Box<dyn ClipMerger>,
        pending: PendingClips,
    ) -> Self {
        Self {
            layout,
            encoder,
            merger,
            pending,
        }
    }

    pub fn pending(&self) -> &PendingClips {
        &self.pending
    }

    pub fn into_pending(self) -> PendingClips {
        self.pending
    }

    /// Runs stage A, then B if the hour closed, then C if the day closed.
    pub fn run(&mut self, job: &HandoffJob) -> Result<JobOutcome> {
        let label = job.label();
        let mut outcome = JobOutcome {
            five_min_clip: self
                .stills_to_five_min(&job.snapshot)
                .with_context(|| format!("stage A failed for {}", label))?,
            ..JobOutcome::default()
        };
        if job.crossing.hour {
            outcome.hour_clips = self
                .merge_pending(Granularity::Hour, label)
                .with_context(|| format!("stage B failed for {}", label))?;
        }
        if job.crossing.day {
            outcome.day_clips = self
                .merge_pending(Granularity::Day, label)
                .with_context(|| format!("stage C failed for {}", label))?;
        }
        Ok(outcome)
    }

    /// Stage A: encodes a snapshot into its 5-minute clip and removes it.
    fn stills_to_five_min(&mut self, snapshot: &Snapshot) -> Result<Option<PathBuf>> {
        let stills = renumber_contiguous(&snapshot.dir)?;
        if stills != snapshot.stills {
            log::warn!(
                "stage A: {} handed off with {} stills, {} on disk",
                snapshot.label,
                snapshot.stills,
                stills
            );
        }
        if stills == 0 {
            log::info!(
                "stage A: {} is empty, removing {}",
                snapshot.label,
                snapshot.dir.display()
            );
            remove_snapshot(&snapshot.dir)?;
            return Ok(None);
        }

        let output = self
            .layout
            .clip_path(Granularity::FiveMinutes, snapshot.label);
        if output.exists() {
            return Err(anyhow!(
                "{} already exists, not overwriting it with {}",
                output.display(),
                snapshot.dir.display()
            ));
        }
        let partial = partial_path(&output);
        log::info!(
            "stage A: encoding {} stills from {} -> {}",
            stills,
            snapshot.dir.display(),
            output.display()
        );
        if let Err(err) = self.encoder.encode(&snapshot.dir, stills, &partial) {
            discard_partial(&partial);
            return Err(err);
        }
        let marker = encoded_marker(&snapshot.dir);
        fs::write(&marker, format!("{}\n", output.display()))
            .with_context(|| format!("failed to write {}", marker.display()))?;
        publish(&partial, &output)?;

        log::info!("stage A: done, deleting {}", snapshot.dir.display());
        remove_snapshot(&snapshot.dir)?;
        self.pending.five_mins.push(output.clone());
        Ok(Some(output))
    }

    /// Stages B and C: merges pending clips into `target` clips.
    ///
    /// Pending sources are grouped by the `target` bucket their names fall in
    /// and every group up to `label` gets its own clip. In steady state that
    /// is a single group holding the whole list.
    fn merge_pending(&mut self, target: Granularity, label: TimeBucket) -> Result<Vec<PathBuf>> {
        let source = match target {
            Granularity::Hour => Granularity::FiveMinutes,
            Granularity::Day => Granularity::Hour,
            Granularity::FiveMinutes => return Err(anyhow!("nothing merges into 5-minute clips")),
        };
        let closing = label.truncate(target);
        let mut groups: BTreeMap<TimeBucket, Vec<PathBuf>> = BTreeMap::new();
        for clip in self.pending.sources(target) {
            let bucket = match self.layout.clip_bucket(source, clip) {
                Ok(bucket) => bucket.truncate(target),
                Err(_) => closing,
            };
            if bucket <= closing {
                groups.entry(bucket).or_default().push(clip.clone());
            }
        }

        let mut outputs = Vec::new();
        for (bucket, inputs) in groups {
            let output = self.layout.clip_path(target, bucket);
            log::info!(
                "{}: {} clip(s) from {} -> {}",
                stage_name(target),
                inputs.len(),
                self.layout.clip_dir(source).display(),
                output.display()
            );
            self.merge_clips(&inputs, &output)?;

            if let Some(sources) = self.pending.sources_mut(target) {
                sources.retain(|clip| !inputs.contains(clip));
            }
            if target == Granularity::Hour {
                self.pending.hours.push(output.clone());
            }
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Merges `inputs` in order into `output`, then deletes the inputs.
    fn merge_clips(&mut self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if output.exists() {
            return Err(anyhow!(
                "{} already exists, not overwriting it",
                output.display()
            ));
        }
        if let [single] = inputs {
            // one input is already the merged clip
            return publish(single, output);
        }

        let partial = partial_path(output);
        if let Err(err) = self.merger.merge(inputs, &partial) {
            discard_partial(&partial);
            return Err(err);
        }
        publish(&partial, output)?;

        log::info!("merge: done, deleting {} file(s)", inputs.len());
        for input in inputs {
            fs::remove_file(input)
                .with_context(|| format!("failed to delete {}", input.display()))?;
        }
        Ok(())
    }
}

fn stage_name(target: Granularity) -> &'static str {
    match target {
        Granularity::FiveMinutes => "stage A",
        Granularity::Hour => "stage B",
        Granularity::Day => "stage C",
    }
}

/// Makes the stills in `dir` a gap-free `0.jpg ..` sequence, keeping their
/// order. Returns the number of stills.
fn renumber_contiguous(dir: &Path) -> Result<usize> {
    let stills = list_stills(dir)?;
    for (index, still) in stills.iter().enumerate() {
        let index = index as u64;
        if still.number == index {
            continue;
        }
        let target = dir.join(format!("{}.{}", index, crate::store::STILL_EXTENSION));
        log::warn!(
            "stage A: closing gap, {} -> {}",
            still.path.display(),
            target.display()
        );
        fs::rename(&still.path, &target)
            .with_context(|| format!("failed to renumber {}", still.path.display()))?;
    }
    Ok(stills.len())
}

fn remove_snapshot(dir: &Path) -> Result<()> {
    fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))
}

fn discard_partial(partial: &Path) {
    if partial.exists() {
        if let Err(err) = fs::remove_file(partial) {
            log::warn!("failed to remove {}: {}", partial.display(), err);
        }
    }
}

/// Bounded queue feeding a single consolidation thread.
pub struct ConsolidationWorker {
    sender: Option<SyncSender<HandoffJob>>,
    handle: Option<JoinHandle<Result<PendingClips>>>,
}

impl ConsolidationWorker {
    pub fn spawn(consolidator: Consolidator, capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let handle = std::thread::Builder::new()
            .name("consolidation".to_string())
            .spawn(move || run_worker(consolidator, receiver))
            .context("failed to spawn consolidation thread")?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queues a job. A full queue blocks until the worker takes one.
    pub fn submit(&mut self, job: HandoffJob) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("consolidation worker already shut down"))?;
        let job = match sender.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(job)) => {
                log::warn!(
                    "consolidation queue full, waiting to queue {}",
                    job.label()
                );
                job
            }
            Err(TrySendError::Disconnected(_)) => return Err(self.worker_error()),
        };
        if sender.send(job).is_err() {
            return Err(self.worker_error());
        }
        Ok(())
    }

    /// Returns the worker's error if it has stopped.
    pub fn check(&mut self) -> Result<()> {
        let finished = self
            .handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false);
        if finished {
            return Err(self.worker_error());
        }
        Ok(())
    }

    /// Closes the queue, lets queued jobs finish and returns the final
    /// pending lists.
    pub fn shutdown(mut self) -> Result<PendingClips> {
        self.sender = None;
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("consolidation worker already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("consolidation worker panicked"))?
    }

    fn worker_error(&mut self) -> anyhow::Error {
        self.sender = None;
        let Some(handle) = self.handle.take() else {
            return anyhow!("consolidation worker already stopped");
        };
        match handle.join() {
            Ok(Err(err)) => err.context("consolidation worker failed"),
            Ok(Ok(_)) => anyhow!("consolidation worker exited unexpectedly"),
            Err(_) => anyhow!("consolidation worker panicked"),
        }
    }
}

fn run_worker(mut consolidator: Consolidator, receiver: Receiver<HandoffJob>) -> Result<PendingClips> {
    for job in receiver {
        match consolidator.run(&job) {
            Ok(outcome) => log::debug!("consolidation: {} done: {:?}", job.label(), outcome),
            Err(err) => {
                log::error!("consolidation: {:#}", err);
                return Err(err);
            }
        }
    }
    log::info!("consolidation: queue closed, worker exiting");
    Ok(consolidator.into_pending())
}
