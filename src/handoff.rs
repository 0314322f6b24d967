//! Handoff of the live still directory to consolidation.
//!
//! The live directory is renamed to a per-bucket snapshot name and a fresh,
//! empty live directory is created in its place. Capture runs on the same
//! thread as the handoff, so no still write can land between the rename and
//! the recreate: every still ends up either in the snapshot or in the new
//! live directory, never both.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::bucket::TimeBucket;
use crate::store::{BucketLayout, LiveStills};

/// A handed-off still batch, owned by whoever consolidates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub label: TimeBucket,
    pub dir: PathBuf,
    pub stills: usize,
}

/// Swaps the live still directory out as the snapshot for `label`.
///
/// Errors leave no safe state to continue from and are meant to be fatal.
pub fn hand_off(layout: &BucketLayout, live: &mut LiveStills, label: TimeBucket) -> Result<Snapshot> {
    let stills_dir = layout.stills_dir();
    let snapshot_dir = layout.snapshot_dir(label);
    if snapshot_dir.exists() {
        return Err(anyhow!(
            "snapshot {} already exists, refusing to merge two still batches",
            snapshot_dir.display()
        ));
    }

    log::info!(
        "handoff: {} -> {} ({} stills)",
        stills_dir.display(),
        snapshot_dir.display(),
        live.len()
    );
    fs::rename(&stills_dir, &snapshot_dir).with_context(|| {
        format!(
            "failed to rename {} to {}",
            stills_dir.display(),
            snapshot_dir.display()
        )
    })?;
    fs::create_dir(&stills_dir)
        .with_context(|| format!("failed to recreate {}", stills_dir.display()))?;

    let stills = live.len();
    live.reset();

    Ok(Snapshot {
        label,
        dir: snapshot_dir,
        stills,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_stills;
    use chrono::NaiveDateTime;

    fn bucket(ts: &str) -> TimeBucket {
        TimeBucket::floor_5min(
            NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").expect("timestamp"),
        )
    }

    fn capture(layout: &BucketLayout, live: &mut LiveStills) -> Result<()> {
        let path = layout.still_path(live.next_number());
        fs::write(&path, b"jpeg")?;
        live.record(path);
        Ok(())
    }

    #[test]
    fn handoff_moves_every_live_still_to_the_snapshot() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let layout = BucketLayout::new(temp_dir.path(), "avi");
        layout.ensure_dirs()?;
        let mut live = LiveStills::new();
        for _ in 0..3 {
            capture(&layout, &mut live)?;
        }

        let label = bucket("2024-01-01 10:00:00");
        let snapshot = hand_off(&layout, &mut live, label)?;

        assert_eq!(snapshot.label, label);
        assert_eq!(snapshot.stills, 3);
        assert_eq!(snapshot.dir, layout.snapshot_dir(label));
        assert_eq!(live.next_number(), 0);
        assert!(live.is_empty());
        assert!(list_stills(&layout.stills_dir())?.is_empty());

        let moved: Vec<u64> = list_stills(&snapshot.dir)?
            .iter()
            .map(|still| still.number)
            .collect();
        assert_eq!(moved, vec![0, 1, 2]);

        capture(&layout, &mut live)?;
        assert!(layout.still_path(0).exists());
        assert_eq!(list_stills(&snapshot.dir)?.len(), 3);
        Ok(())
    }

    #[test]
    fn handoff_refuses_existing_snapshot() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let layout = BucketLayout::new(temp_dir.path(), "avi");
        layout.ensure_dirs()?;
        let label = bucket("2024-01-01 10:00:00");
        fs::create_dir(layout.snapshot_dir(label))?;

        let mut live = LiveStills::new();
        capture(&layout, &mut live)?;
        let err = hand_off(&layout, &mut live, label).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(live.len(), 1);
        assert!(layout.still_path(0).exists());
        Ok(())
    }
}
