//! Manifest: the durable index of segment files per column family
//!
//! Stored as `manifest.json` in the data directory:
//!
//! ```json
//! {"cfs": {"blocks": {"next_file_id": 2, "sstables": [{"file": "00000001.sst", "sequence": 2}], "sequence": 2}}}
//! ```
//!
//! Every save goes through an atomic replace, and callers only reference a
//! segment here after the segment file itself is durable. A segment on disk
//! that the manifest does not list is an orphan and is safe to delete; a
//! listed segment that is missing is a fatal inconsistency.

use crate::fsutil::atomic_write;
use crate::sstable::parse_segment_id;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Reference to one segment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    /// File name inside the column family directory
    pub file: String,
    /// Manifest sequence at which the segment was added
    pub sequence: u64,
}

/// Per column family manifest entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfManifest {
    pub next_file_id: u64,
    /// Oldest first
    pub sstables: Vec<SegmentRef>,
    pub sequence: u64,
}

impl CfManifest {
    /// Consume the id a segment was just written under. Callers write to
    /// `next_file_id` first, so a failed write leaves the id free.
    pub fn allocate_file_id(&mut self) -> u64 {
        let id = self.next_file_id;
        self.next_file_id += 1;
        id
    }

    /// Append a newly flushed segment (newest)
    pub fn push_segment(&mut self, file: impl Into<String>) {
        self.sequence += 1;
        self.sstables.push(SegmentRef {
            file: file.into(),
            sequence: self.sequence,
        });
    }

    /// Replace every segment with a single compacted one
    pub fn replace_segments(&mut self, file: impl Into<String>) {
        self.sequence += 1;
        self.sstables = vec![SegmentRef {
            file: file.into(),
            sequence: self.sequence,
        }];
    }

    /// Segment file names, oldest first
    pub fn segment_files(&self) -> impl Iterator<Item = &str> {
        self.sstables.iter().map(|s| s.file.as_str())
    }
}

/// How [`Manifest::load`] obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    /// Parsed from `manifest.json`
    Loaded,
    /// No manifest file existed
    Missing,
    /// The file existed but could not be parsed
    Corrupt,
}

/// Engine-wide manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub cfs: BTreeMap<String, CfManifest>,
}

impl Manifest {
    /// Read the manifest from `root`.
    ///
    /// A missing or unparsable file yields an empty manifest; the returned
    /// [`ManifestSource`] tells the caller which case applied. Other I/O
    /// errors are returned.
    pub fn load(root: &Path) -> Result<(Self, ManifestSource)> {
        let path = root.join(crate::config::MANIFEST_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok((Self::default(), ManifestSource::Missing))
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&data) {
            Ok(manifest) => Ok((manifest, ManifestSource::Loaded)),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to load manifest, starting empty");
                Ok((Self::default(), ManifestSource::Corrupt))
            }
        }
    }

    /// Atomically replace `manifest.json` in `root`
    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        atomic_write(&root.join(crate::config::MANIFEST_FILE), &data)
    }

    /// Rebuild a manifest from the directory layout: every subdirectory is a
    /// column family and its segment files, ordered by id, are its segments.
    pub fn from_directory_scan(root: &Path) -> Result<Self> {
        let mut manifest = Self::default();

        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let mut ids = Vec::new();
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                if let Some(id) = file.file_name().to_str().and_then(parse_segment_id) {
                    ids.push(id);
                }
            }
            ids.sort_unstable();

            let mut cf = CfManifest {
                next_file_id: ids.last().map_or(0, |id| id + 1),
                ..Default::default()
            };
            for id in ids {
                cf.push_segment(crate::sstable::segment_file_name(id));
            }

            info!(cf = %name, segments = cf.sstables.len(), "Recovered column family from directory scan");
            manifest.cfs.insert(name, cf);
        }

        Ok(manifest)
    }

    /// Insert an empty entry for `name` if absent. Returns true if created.
    pub fn ensure_cf(&mut self, name: &str) -> bool {
        if self.cfs.contains_key(name) {
            return false;
        }
        self.cfs.insert(name.to_string(), CfManifest::default());
        true
    }

    pub fn cf(&self, name: &str) -> Option<&CfManifest> {
        self.cfs.get(name)
    }

    pub fn cf_mut(&mut self, name: &str) -> Option<&mut CfManifest> {
        self.cfs.get_mut(name)
    }
}
