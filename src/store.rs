//! On-disk bucket directories and their in-memory mirrors.
//!
//! Layout under the root:
//!
//! ```text
//! bucket_stills/                    live stills, 0.jpg 1.jpg ...
//! bucket_stills_temp_<label>/       snapshot handed off for encoding
//! bucket_5min/YYYY-MM-DD_HH-MM.ext  pending 5-minute clips
//! bucket_hour/YYYY-MM-DD_HH.ext     pending hourly clips
//! bucket_day/YYYY-MM-DD.ext         finished daily clips
//! ```

use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::bucket::{Granularity, TimeBucket};

pub const STILLS_DIR: &str = "bucket_stills";
pub const STILLS_TEMP_PREFIX: &str = "bucket_stills_temp";
pub const FIVE_MIN_DIR: &str = "bucket_5min";
pub const HOUR_DIR: &str = "bucket_hour";
pub const DAY_DIR: &str = "bucket_day";
pub const STILL_EXTENSION: &str = "jpg";
pub const PARTIAL_EXTENSION: &str = "part";
/// Written into a snapshot once its clip is encoded, before the clip is published.
pub const ENCODED_MARKER: &str = "encoded";

#[derive(Clone, Debug)]
pub struct BucketLayout {
    root: PathBuf,
    clip_extension: String,
}

impl BucketLayout {
    pub fn new(root: impl Into<PathBuf>, clip_extension: &str) -> Self {
        Self {
            root: root.into(),
            clip_extension: clip_extension.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clip_extension(&self) -> &str {
        &self.clip_extension
    }

    pub fn stills_dir(&self) -> PathBuf {
        self.root.join(STILLS_DIR)
    }

    pub fn still_path(&self, number: u64) -> PathBuf {
        self.stills_dir()
            .join(format!("{}.{}", number, STILL_EXTENSION))
    }

    /// Snapshot directory a handed-off still batch for `label` lives in.
    pub fn snapshot_dir(&self, label: TimeBucket) -> PathBuf {
        self.root.join(format!("{}_{}", STILLS_TEMP_PREFIX, label))
    }

    pub fn clip_dir(&self, granularity: Granularity) -> PathBuf {
        let name = match granularity {
            Granularity::FiveMinutes => FIVE_MIN_DIR,
            Granularity::Hour => HOUR_DIR,
            Granularity::Day => DAY_DIR,
        };
        self.root.join(name)
    }

    pub fn clip_path(&self, granularity: Granularity, bucket: TimeBucket) -> PathBuf {
        self.clip_dir(granularity).join(format!(
            "{}.{}",
            granularity.label(bucket),
            self.clip_extension
        ))
    }

    /// Bucket a clip file belongs to, from its file name.
    pub fn clip_bucket(&self, granularity: Granularity, path: &Path) -> Result<TimeBucket> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("clip path {} has no usable file name", path.display()))?;
        granularity.parse(stem)
    }

    /// Creates the live and clip directories if they are missing.
    ///
    /// Snapshot directories are never created here; they only come into
    /// existence by renaming the live directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.stills_dir(),
            self.clip_dir(Granularity::FiveMinutes),
            self.clip_dir(Granularity::Hour),
            self.clip_dir(Granularity::Day),
        ] {
            if !dir.exists() {
                log::info!("store: creating {}", dir.display());
                fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Snapshot directories left on disk, oldest first.
    ///
    /// Entries whose suffix is not a valid label are skipped with a warning.
    pub fn list_snapshots(&self) -> Result<Vec<(TimeBucket, PathBuf)>> {
        let prefix = format!("{}_", STILLS_TEMP_PREFIX);
        let mut snapshots = Vec::new();
        for entry in read_dir_sorted(&self.root)? {
            let Some(name) = entry.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(label) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !entry.is_dir() {
                continue;
            }
            match Granularity::FiveMinutes.parse(label) {
                Ok(bucket) => snapshots.push((bucket, entry)),
                Err(err) => log::warn!("store: ignoring snapshot {}: {}", entry.display(), err),
            }
        }
        snapshots.sort_by_key(|(bucket, _)| *bucket);
        Ok(snapshots)
    }

    /// Published clips in a clip directory, in chronological (name) order.
    pub fn list_clips(&self, granularity: Granularity) -> Result<Vec<PathBuf>> {
        let mut clips = Vec::new();
        for path in read_dir_sorted(&self.clip_dir(granularity))? {
            if !path.is_file() || !has_extension(&path, &self.clip_extension) {
                continue;
            }
            if let Err(err) = self.clip_bucket(granularity, &path) {
                log::warn!("store: ignoring clip {}: {}", path.display(), err);
                continue;
            }
            clips.push(path);
        }
        Ok(clips)
    }

    /// Unpublished `.part` outputs in a clip directory.
    pub fn list_partials(&self, granularity: Granularity) -> Result<Vec<PathBuf>> {
        Ok(read_dir_sorted(&self.clip_dir(granularity))?
            .into_iter()
            .filter(|path| path.is_file() && has_extension(path, PARTIAL_EXTENSION))
            .collect())
    }
}

/// A numbered still inside a still directory.
#[derive(Clone, Debug)]
pub struct StillEntry {
    pub number: u64,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Numbered stills in `dir`, ascending by number. Other files are ignored.
pub fn list_stills(dir: &Path) -> Result<Vec<StillEntry>> {
    let mut stills = Vec::new();
    for path in read_dir_sorted(dir)? {
        let Some(number) = still_number(&path) else {
            continue;
        };
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("failed to stat {}", path.display()))?;
        stills.push(StillEntry {
            number,
            path,
            modified,
        });
    }
    stills.sort_by_key(|still| still.number);
    Ok(stills)
}

/// Sequence number of a `<n>.jpg` still.
pub fn still_number(path: &Path) -> Option<u64> {
    if !has_extension(path, STILL_EXTENSION) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Temporary output path a clip is written to before it is published.
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    output.with_file_name(name)
}

pub fn encoded_marker(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(ENCODED_MARKER)
}

/// Moves a finished `.part` output onto its final name.
pub fn publish(partial: &Path, output: &Path) -> Result<()> {
    fs::rename(partial, output).with_context(|| {
        format!(
            "failed to publish {} as {}",
            partial.display(),
            output.display()
        )
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Stills accumulated in the live directory since the last handoff.
#[derive(Clone, Debug, Default)]
pub struct LiveStills {
    next_number: u64,
    contents: Vec<PathBuf>,
}

impl LiveStills {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the mirror from stills found on disk. Numbering resumes after
    /// the highest existing number so nothing is overwritten.
    pub fn from_entries(entries: &[StillEntry]) -> Self {
        Self {
            next_number: entries.iter().map(|still| still.number + 1).max().unwrap_or(0),
            contents: entries.iter().map(|still| still.path.clone()).collect(),
        }
    }

    /// Number the next capture is written under.
    pub fn next_number(&self) -> u64 {
        self.next_number
    }

    pub fn contents(&self) -> &[PathBuf] {
        &self.contents
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Records a capture written at `path` and moves to the next number.
    pub fn record(&mut self, path: PathBuf) {
        self.contents.push(path);
        self.next_number += 1;
    }

    pub fn reset(&mut self) {
        self.next_number = 0;
        self.contents.clear();
    }
}

/// Clips awaiting the next hourly and daily merges, in append order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingClips {
    pub five_mins: Vec<PathBuf>,
    pub hours: Vec<PathBuf>,
}

impl PendingClips {
    pub fn load(layout: &BucketLayout) -> Result<Self> {
        Ok(Self {
            five_mins: layout.list_clips(Granularity::FiveMinutes)?,
            hours: layout.list_clips(Granularity::Hour)?,
        })
    }

    /// Pending sources consumed by a merge at `granularity`.
    pub fn sources(&self, granularity: Granularity) -> &[PathBuf] {
        match granularity {
            Granularity::FiveMinutes => &[],
            Granularity::Hour => &self.five_mins,
            Granularity::Day => &self.hours,
        }
    }

    pub fn sources_mut(&mut self, granularity: Granularity) -> Option<&mut Vec<PathBuf>> {
        match granularity {
            Granularity::FiveMinutes => None,
            Granularity::Hour => Some(&mut self.five_mins),
            Granularity::Day => Some(&mut self.hours),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn bucket(ts: &str) -> TimeBucket {
        TimeBucket::floor_5min(
            NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").expect("timestamp"),
        )
    }

    #[test]
    fn clip_paths_follow_labels() {
        let layout = BucketLayout::new("/srv/timelapse", "avi");
        let label = bucket("2024-01-01 10:03:00");
        assert_eq!(
            layout.clip_path(Granularity::FiveMinutes, label),
            PathBuf::from("/srv/timelapse/bucket_5min/2024-01-01_10-00.avi")
        );
        assert_eq!(
            layout.clip_path(Granularity::Hour, label),
            PathBuf::from("/srv/timelapse/bucket_hour/2024-01-01_10.avi")
        );
        assert_eq!(
            layout.clip_path(Granularity::Day, label),
            PathBuf::from("/srv/timelapse/bucket_day/2024-01-01.avi")
        );
        assert_eq!(
            layout.snapshot_dir(label),
            PathBuf::from("/srv/timelapse/bucket_stills_temp_2024-01-01_10-00")
        );
        assert_eq!(
            layout.still_path(7),
            PathBuf::from("/srv/timelapse/bucket_stills/7.jpg")
        );
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/x/bucket_hour/2024-01-01_10.avi")),
            PathBuf::from("/x/bucket_hour/2024-01-01_10.avi.part")
        );
    }

    #[test]
    fn still_numbers_parse_only_numbered_jpegs() {
        assert_eq!(still_number(Path::new("/a/12.jpg")), Some(12));
        assert_eq!(still_number(Path::new("/a/0.jpg")), Some(0));
        assert_eq!(still_number(Path::new("/a/12.png")), None);
        assert_eq!(still_number(Path::new("/a/foo.jpg")), None);
    }

    #[test]
    fn lists_stills_numerically() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for name in ["10.jpg", "2.jpg", "0.jpg", "notes.txt", "1.jpg"] {
            fs::write(temp_dir.path().join(name), b"x")?;
        }
        let numbers: Vec<u64> = list_stills(temp_dir.path())?
            .iter()
            .map(|still| still.number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2, 10]);
        Ok(())
    }

    #[test]
    fn live_stills_resume_after_highest_number() {
        let entries: Vec<StillEntry> = [0u64, 1, 5]
            .iter()
            .map(|n| StillEntry {
                number: *n,
                path: PathBuf::from(format!("{}.jpg", n)),
                modified: SystemTime::UNIX_EPOCH,
            })
            .collect();
        let mut live = LiveStills::from_entries(&entries);
        assert_eq!(live.next_number(), 6);
        assert_eq!(live.len(), 3);

        live.record(PathBuf::from("6.jpg"));
        assert_eq!(live.next_number(), 7);

        live.reset();
        assert_eq!(live.next_number(), 0);
        assert!(live.is_empty());
    }

    #[test]
    fn lists_clips_and_partials_separately() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let layout = BucketLayout::new(temp_dir.path(), "avi");
        layout.ensure_dirs()?;
        let dir = layout.clip_dir(Granularity::FiveMinutes);
        for name in [
            "2024-01-01_10-05.avi",
            "2024-01-01_10-00.avi",
            "2024-01-01_10-10.avi.part",
            "garbage.avi",
            "2024-01-01_10-15.mkv",
        ] {
            fs::write(dir.join(name), b"clip")?;
        }

        let clips = layout.list_clips(Granularity::FiveMinutes)?;
        assert_eq!(
            clips,
            vec![dir.join("2024-01-01_10-00.avi"), dir.join("2024-01-01_10-05.avi")]
        );
        let partials = layout.list_partials(Granularity::FiveMinutes)?;
        assert_eq!(partials, vec![dir.join("2024-01-01_10-10.avi.part")]);
        Ok(())
    }

    #[test]
    fn lists_snapshots_oldest_first() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let layout = BucketLayout::new(temp_dir.path(), "avi");
        layout.ensure_dirs()?;
        let late = bucket("2024-01-01 10:10:00");
        let early = bucket("2024-01-01 09:55:00");
        fs::create_dir(layout.snapshot_dir(late))?;
        fs::create_dir(layout.snapshot_dir(early))?;
        fs::create_dir(temp_dir.path().join("bucket_stills_temp_bogus"))?;

        let snapshots = layout.list_snapshots()?;
        let labels: Vec<TimeBucket> = snapshots.iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, vec![early, late]);
        Ok(())
    }
}
