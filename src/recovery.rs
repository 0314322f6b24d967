//! Startup reconciliation of the bucket directories.
//!
//! Clips are only ever published by renaming a finished `.part` file, so the
//! presence of a final-named clip proves the operation that made it finished.
//! That gives the rules applied here:
//!
//! 1. `.part` files are unfinished outputs and are deleted.
//! 2. A 5-minute clip whose hourly clip exists, or an hourly clip whose daily
//!    clip exists, is a merge source whose deletion was interrupted; it is
//!    deleted.
//! 3. A leftover snapshot carrying the encoded marker whose 5-minute clip
//!    exists was already encoded and is removed. A snapshot without the marker
//!    is queued again for encoding, unless a clip already holds its label: that
//!    is a collision, both are left in place and recovery fails.
//! 4. Pending lists are rebuilt from the clip directories, the still counter
//!    from the live directory.
//! 5. The head starts after every label already on disk, so a clock that
//!    booted behind can never hand off a batch under a published label.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::path::PathBuf;

use crate::bucket::{Crossing, Granularity, TimeBucket};
use crate::consolidate::HandoffJob;
use crate::handoff::Snapshot;
use crate::store::{encoded_marker, list_stills, BucketLayout, LiveStills, PendingClips};

/// State rebuilt from disk, plus what reconciliation had to clean up.
#[derive(Debug)]
pub struct Recovered {
    pub head: TimeBucket,
    pub live: LiveStills,
    pub pending: PendingClips,
    /// Snapshots to encode before any new work, oldest first.
    pub requeued: Vec<HandoffJob>,
    pub removed_partials: Vec<PathBuf>,
    pub removed_orphans: Vec<PathBuf>,
    pub removed_snapshots: Vec<PathBuf>,
}

/// Reconciles the directories under `layout` and rebuilds the in-memory state.
///
/// `now` is used for the head only when no stills are pending, and the head
/// never starts at or before a label already on disk.
pub fn recover(layout: &BucketLayout, now: NaiveDateTime) -> Result<Recovered> {
    layout.ensure_dirs()?;

    let mut removed_partials = Vec::new();
    for granularity in [Granularity::FiveMinutes, Granularity::Hour, Granularity::Day] {
        for partial in layout.list_partials(granularity)? {
            log::warn!("recovery: deleting unfinished {}", partial.display());
            remove_file(&partial)?;
            removed_partials.push(partial);
        }
    }

    let mut removed_orphans = remove_orphans(layout, Granularity::FiveMinutes, Granularity::Hour)?;
    removed_orphans.extend(remove_orphans(layout, Granularity::Hour, Granularity::Day)?);

    let mut requeued = Vec::new();
    let mut removed_snapshots = Vec::new();
    for (label, dir) in layout.list_snapshots()? {
        let clip = layout.clip_path(Granularity::FiveMinutes, label);
        let marker = encoded_marker(&dir);
        match (clip.exists(), marker.exists()) {
            (true, true) => {
                log::warn!(
                    "recovery: {} was already encoded, deleting {}",
                    label,
                    dir.display()
                );
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to remove {}", dir.display()))?;
                removed_snapshots.push(dir);
                continue;
            }
            (true, false) => {
                log::error!(
                    "recovery: snapshot {} was never encoded but {} exists",
                    dir.display(),
                    clip.display()
                );
                return Err(anyhow!(
                    "snapshot {} collides with published clip {}; leaving both in place",
                    dir.display(),
                    clip.display()
                ));
            }
            (false, true) => {
                log::warn!(
                    "recovery: {} was encoded but never published, encoding again",
                    label
                );
                remove_file(&marker)?;
            }
            (false, false) => {}
        }
        let stills = list_stills(&dir)?.len();
        log::info!(
            "recovery: requeueing snapshot {} ({} stills)",
            dir.display(),
            stills
        );
        requeued.push(HandoffJob {
            snapshot: Snapshot { label, dir, stills },
            crossing: Crossing::five_min_only(),
        });
    }

    let stills = list_stills(&layout.stills_dir())?;
    let mut head = match stills.iter().map(|still| still.modified).min() {
        Some(oldest) => {
            let oldest: DateTime<Local> = oldest.into();
            TimeBucket::floor_5min(oldest.naive_local())
        }
        None => TimeBucket::floor_5min(now),
    };
    if let Some(floor) = first_free_bucket(layout, &requeued)? {
        if floor > head {
            log::warn!(
                "recovery: clock is behind labels on disk, head moved from {} to {}",
                head,
                floor
            );
            head = floor;
        }
    }
    let live = LiveStills::from_entries(&stills);
    let pending = PendingClips::load(layout)?;

    log::info!(
        "recovery: head={} stills={} next_still={} pending_5min={} pending_hour={} requeued={}",
        head,
        live.len(),
        live.next_number(),
        pending.five_mins.len(),
        pending.hours.len(),
        requeued.len()
    );

    Ok(Recovered {
        head,
        live,
        pending,
        requeued,
        removed_partials,
        removed_orphans,
        removed_snapshots,
    })
}

/// First 5-minute bucket later than every published clip and queued snapshot.
fn first_free_bucket(
    layout: &BucketLayout,
    requeued: &[HandoffJob],
) -> Result<Option<TimeBucket>> {
    let mut floor = requeued
        .iter()
        .map(|job| job.label().following(Granularity::FiveMinutes))
        .max();
    for granularity in [Granularity::FiveMinutes, Granularity::Hour, Granularity::Day] {
        for clip in layout.list_clips(granularity)? {
            let next = layout.clip_bucket(granularity, &clip)?.following(granularity);
            floor = floor.max(Some(next));
        }
    }
    Ok(floor)
}

fn remove_orphans(
    layout: &BucketLayout,
    source: Granularity,
    target: Granularity,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for clip in layout.list_clips(source)? {
        let bucket = layout.clip_bucket(source, &clip)?;
        let merged = layout.clip_path(target, bucket);
        if merged.exists() {
            log::warn!(
                "recovery: {} already merged into {}, deleting",
                clip.display(),
                merged.display()
            );
            remove_file(&clip)?;
            removed.push(clip);
        }
    }
    Ok(removed)
}

fn remove_file(path: &std::path::Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("failed to delete {}", path.display()))
}
