//! Region discovery and metadata management
//!
//! Next to every region file `<dir>/rtlink_<name>` the owner writes a JSON
//! companion `<dir>/rtlink_<name>.meta`. Discovery only trusts the metadata
//! for naming; liveness always comes from the region header itself.

use crate::error::{ShmError, ShmResult};
use crate::platform::is_process_alive;
use crate::region::RegionHandle;
use rtlink_common::config::{RegionConfig, region_meta_path};
use rtlink_common::consts::{REGION_FILE_PREFIX, REGION_META_EXT};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Region metadata written by the owner
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region name
    pub name: String,
    /// Device capacity at the last create or grow
    pub capacity: usize,
    /// Owner process ID
    pub owner_pid: u32,
    /// Layout revision
    pub layout_version: u32,
    /// Creation time, ms since epoch
    pub created_ms: u64,
}

impl RegionInfo {
    /// Write (or replace) the metadata file in `dir`.
    pub fn write(&self, dir: &Path) -> ShmResult<()> {
        let path = region_meta_path(dir, &self.name);
        let json = serde_json::to_string_pretty(self)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .mode(0o600) // Owner read/write only
            .open(&path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Read the metadata file of region `name` in `dir`.
    pub fn read(dir: &Path, name: &str) -> ShmResult<Self> {
        let content = std::fs::read_to_string(region_meta_path(dir, name))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Observed state of a discovered region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLiveness {
    /// Attachable
    Live,
    /// Owner dead or not refreshing
    Stale,
    /// Metadata present but no usable region file
    Missing,
}

/// One discovered region
#[derive(Debug, Clone)]
pub struct DiscoveredRegion {
    /// Metadata as written by the owner
    pub info: RegionInfo,
    /// Observed liveness
    pub liveness: RegionLiveness,
}

/// Region discovery over one directory
///
/// Liveness is judged against the window each owner published in its
/// region header.
pub struct RegionDiscovery {
    dir: PathBuf,
}

impl RegionDiscovery {
    /// Discover regions in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// List all regions with a metadata file, sorted by name
    pub fn list_regions(&self) -> ShmResult<Vec<DiscoveredRegion>> {
        let mut regions = Vec::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(regions),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{REGION_META_EXT}");
        for entry in entries.flatten() {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(name) = file_name
                .strip_prefix(REGION_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            match RegionInfo::read(&self.dir, name) {
                Ok(info) => {
                    let liveness = self.liveness_of(&info.name);
                    regions.push(DiscoveredRegion { info, liveness });
                }
                Err(e) => debug!(file = %file_name, error = %e, "skipping unreadable metadata"),
            }
        }

        regions.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        Ok(regions)
    }

    /// Find region by name
    pub fn find_region(&self, name: &str) -> ShmResult<Option<DiscoveredRegion>> {
        match RegionInfo::read(&self.dir, name) {
            Ok(info) => {
                let liveness = self.liveness_of(name);
                Ok(Some(DiscoveredRegion { info, liveness }))
            }
            Err(ShmError::Io { source }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove regions whose owner process no longer exists
    ///
    /// Regions that are merely slow to refresh keep their files.
    pub fn cleanup_orphaned(&self) -> ShmResult<usize> {
        let mut cleaned = 0;
        for region in self.list_regions()? {
            let orphaned = match region.liveness {
                RegionLiveness::Live => false,
                RegionLiveness::Missing => true,
                RegionLiveness::Stale => !is_process_alive(region.info.owner_pid),
            };
            if !orphaned {
                continue;
            }
            let config = RegionConfig::named(&self.dir, &region.info.name);
            for path in [
                config.region_path(),
                region_meta_path(&self.dir, &region.info.name),
            ] {
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            info!(region = %region.info.name, owner_pid = region.info.owner_pid, "removed orphaned region");
            cleaned += 1;
        }
        Ok(cleaned)
    }

    fn liveness_of(&self, name: &str) -> RegionLiveness {
        match RegionHandle::attach(&RegionConfig::named(&self.dir, name)) {
            Ok(_) => RegionLiveness::Live,
            Err(ShmError::RegionStale { .. }) => RegionLiveness::Stale,
            Err(_) => RegionLiveness::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionOwner;

    #[test]
    fn test_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let info = RegionInfo {
            name: "meta".into(),
            capacity: 4,
            owner_pid: 42,
            layout_version: 1,
            created_ms: 1_700_000_000_000,
        };
        info.write(dir.path()).unwrap();
        assert_eq!(RegionInfo::read(dir.path(), "meta").unwrap(), info);
    }

    #[test]
    fn test_lists_live_region() {
        let dir = tempfile::tempdir().unwrap();
        let _owner = RegionOwner::create_in(dir.path(), "found", 2).unwrap();

        let discovery = RegionDiscovery::new(dir.path());
        let regions = discovery.list_regions().unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].info.name, "found");
        assert_eq!(regions[0].info.capacity, 2);
        assert_eq!(regions[0].liveness, RegionLiveness::Live);

        assert!(discovery.find_region("absent").unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let discovery = RegionDiscovery::new("/nonexistent/rtlink/dir");
        assert!(discovery.list_regions().unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_removes_metadata_without_region() {
        let dir = tempfile::tempdir().unwrap();
        RegionInfo {
            name: "ghost".into(),
            capacity: 1,
            owner_pid: 0,
            layout_version: 1,
            created_ms: 0,
        }
        .write(dir.path())
        .unwrap();
        let _live = RegionOwner::create_in(dir.path(), "kept", 1).unwrap();

        let discovery = RegionDiscovery::new(dir.path());
        assert_eq!(discovery.cleanup_orphaned().unwrap(), 1);
        let names: Vec<_> = discovery
            .list_regions()
            .unwrap()
            .into_iter()
            .map(|r| r.info.name)
            .collect();
        assert_eq!(names, vec!["kept".to_string()]);
    }
}
