//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Create a region file of `size` bytes and map it.
///
/// Fails with `AlreadyExists` IO error when the file is present; the caller
/// decides whether that means a live region or a leftover one.
pub fn create_region_file(path: &Path, size: usize) -> ShmResult<(File, MmapMut)> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)?;

    let mapped = file
        .set_len(size as u64)
        .map_err(|e| classify_io(e, "region file"))
        .and_then(|()| map_file(&file, true));

    match mapped {
        Ok(mmap) => Ok((file, mmap)),
        Err(e) => {
            let _ = std::fs::remove_file(path);
            Err(e)
        }
    }
}

/// Open and map an existing region file.
pub fn open_region_file(path: &Path) -> ShmResult<(File, MmapMut)> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mmap = map_file(&file, false)?;
    Ok((file, mmap))
}

/// Map the whole of `file` shared and writable.
pub fn map_file(file: &File, populate: bool) -> ShmResult<MmapMut> {
    let mut options = MmapOptions::new();
    if populate {
        // Fault pages in up front so the first access is not a page fault.
        options.populate();
    }
    // SAFETY: the region file is only resized by its owner, which grows it and
    // never shrinks it, so the mapping stays backed for its whole lifetime.
    unsafe { options.map_mut(file) }.map_err(|e| classify_io(e, "region mapping"))
}

/// Map ENOSPC/ENOMEM/EFBIG to `ResourceExhausted`, keep everything else as IO.
pub fn classify_io(err: std::io::Error, context: &str) -> ShmError {
    match err.raw_os_error() {
        Some(libc::ENOSPC) | Some(libc::ENOMEM) | Some(libc::EFBIG) => {
            ShmError::ResourceExhausted {
                context: format!("{context}: {err}"),
            }
        }
        _ => ShmError::Io { source: err },
    }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Use a null signal (None) to test for process existence without sending a signal
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false, // No such process
        Err(nix::Error::EPERM) => true,  // Process exists but no permission to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Shared between processes, so a monotonic clock is not an option.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_is_alive() {
        assert!(is_process_alive(get_current_pid()));
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }

    #[test]
    fn test_enospc_is_resource_exhausted() {
        let err = classify_io(std::io::Error::from_raw_os_error(libc::ENOSPC), "x");
        assert!(matches!(err, ShmError::ResourceExhausted { .. }));
        let err = classify_io(std::io::Error::from_raw_os_error(libc::EACCES), "x");
        assert!(matches!(err, ShmError::Io { .. }));
    }

    #[test]
    fn test_create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtlink_plat");
        let (_file, mmap) = create_region_file(&path, 4096).unwrap();
        assert_eq!(mmap.len(), 4096);
        assert!(create_region_file(&path, 4096).is_err());
        let (_file, reopened) = open_region_file(&path).unwrap();
        assert_eq!(reopened.len(), 4096);
    }
}
