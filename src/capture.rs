//! The capture loop.
//!
//! Every tick:
//! 1. floor the current time to its 5-minute bucket and compare to the head
//! 2. on a crossing, hand off the live stills and queue their consolidation
//!    under the *previous* head
//! 3. capture exactly one still, with the indicator lit around it
//! 4. move the head forward
//!
//! Consolidation runs on the worker thread; the loop only blocks on the
//! handoff rename, the capture itself and the sleep to the next tick.

use anyhow::Result;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bucket::{Crossing, TimeBucket};
use crate::config::TimelapseConfig;
use crate::consolidate::{ConsolidationWorker, Consolidator, HandoffJob};
use crate::device::{Devices, Indicator, StillCamera};
use crate::handoff::hand_off;
use crate::recovery::recover;
use crate::schedule::{Clock, TickScheduler};
use crate::store::{BucketLayout, LiveStills, PendingClips};

/// Capture-side state, owned by the capture loop alone.
#[derive(Debug)]
pub struct TimelapseState {
    /// Last processed bucket label. Never moves backwards.
    pub head: TimeBucket,
    pub led_supported: bool,
    pub live: LiveStills,
}

/// What one tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    pub bucket: TimeBucket,
    pub crossing: Crossing,
    pub still: PathBuf,
}

pub struct CaptureLoop {
    layout: BucketLayout,
    state: TimelapseState,
    camera: Box<dyn StillCamera>,
    indicator: Box<dyn Indicator>,
    worker: ConsolidationWorker,
}

impl CaptureLoop {
    /// Recovers on-disk state under `cfg.root`, starts the consolidation
    /// worker and queues any snapshots left over from a previous run.
    pub fn start(cfg: &TimelapseConfig, devices: Devices, now: NaiveDateTime) -> Result<Self> {
        let layout = BucketLayout::new(&cfg.root, &cfg.clip_extension);
        let recovered = recover(&layout, now)?;

        let Devices {
            camera,
            encoder,
            merger,
            mut indicator,
            led_supported,
        } = devices;

        let consolidator = Consolidator::new(layout.clone(), encoder, merger, recovered.pending);
        let mut worker = ConsolidationWorker::spawn(consolidator, cfg.queue_capacity)?;
        for job in recovered.requeued {
            worker.submit(job)?;
        }

        if led_supported {
            set_indicator(indicator.as_mut(), false);
        }

        log::info!(
            "capture: root={} head={} led={}",
            layout.root().display(),
            recovered.head,
            led_supported
        );
        Ok(Self {
            layout,
            state: TimelapseState {
                head: recovered.head,
                led_supported,
                live: recovered.live,
            },
            camera,
            indicator,
            worker,
        })
    }

    pub fn state(&self) -> &TimelapseState {
        &self.state
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    /// Runs one tick at wall-clock time `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> Result<TickOutcome> {
        self.worker.check()?;

        let bucket = TimeBucket::floor_5min(now);
        let crossing = self.state.head.crossing(bucket);
        if bucket < self.state.head {
            log::warn!(
                "capture: clock went back ({} < head {}), staying in current bucket",
                bucket,
                self.state.head
            );
        }

        if crossing.five_min {
            log::info!(
                "capture: boundary {} -> {} (hour={} day={})",
                self.state.head,
                bucket,
                crossing.hour,
                crossing.day
            );
            let snapshot = hand_off(&self.layout, &mut self.state.live, self.state.head)?;
            self.worker.submit(HandoffJob { snapshot, crossing })?;
        }

        let still = self.capture_still()?;

        if bucket > self.state.head {
            self.state.head = bucket;
        }
        Ok(TickOutcome {
            bucket,
            crossing,
            still,
        })
    }

    fn capture_still(&mut self) -> Result<PathBuf> {
        let path = self.layout.still_path(self.state.live.next_number());
        log::debug!("capture: {}", path.display());

        if self.state.led_supported {
            set_indicator(self.indicator.as_mut(), true);
        }
        let result = self.camera.capture(&path);
        if self.state.led_supported {
            set_indicator(self.indicator.as_mut(), false);
        }
        result?;

        self.state.live.record(path.clone());
        Ok(path)
    }

    /// Ticks until `stop` is set or `max_ticks` ticks have run.
    pub fn run(
        &mut self,
        scheduler: &mut TickScheduler,
        clock: &dyn Clock,
        stop: &AtomicBool,
        max_ticks: Option<u64>,
    ) -> Result<u64> {
        let mut ticks = 0u64;
        while !stop.load(Ordering::SeqCst) {
            self.tick(clock.now())?;
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            scheduler.wait();
        }
        Ok(ticks)
    }

    /// Stops accepting work and waits for queued consolidation to finish.
    pub fn finish(self) -> Result<PendingClips> {
        log::info!("capture: stopping, waiting for queued consolidation");
        self.worker.shutdown()
    }
}

fn set_indicator(indicator: &mut dyn Indicator, on: bool) {
    if let Err(err) = indicator.set(on) {
        log::warn!("led: failed to switch {}: {:#}", if on { "on" } else { "off" }, err);
    }
}
