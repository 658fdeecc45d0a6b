// Licensed under the Apache-2.0 license

//! Single-instance guard: a lock file tagged with the owner's pid.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use vbfw_engine::{UpdateError, UpdateResult};

/// Scoped ownership of the updater lock. Dropping it releases the lock on
/// every exit path, success or failure.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> UpdateResult<InstanceLock> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let recorded = contents.trim().parse::<u32>().ok();
                match recorded {
                    Some(pid) if pid_alive(pid) => {
                        return Err(UpdateError::AlreadyRunning { pid });
                    }
                    Some(pid) => {
                        log::warn!(
                            "reclaiming stale lock {} left by dead pid {pid}",
                            path.display()
                        );
                    }
                    None => {
                        log::warn!("reclaiming corrupt lock {}", path.display());
                    }
                }
                fs::remove_file(path).map_err(|e| lock_err(path, e))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(lock_err(path, e)),
        }

        fs::write(path, format!("{}\n", std::process::id())).map_err(|e| lock_err(path, e))?;
        Ok(InstanceLock {
            path: path.to_owned(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to release lock {}: {e}", self.path.display());
        }
    }
}

fn lock_err(path: &Path, e: std::io::Error) -> UpdateError {
    UpdateError::Tool {
        tool: "lock",
        reason: format!("{}: {e}", path.display()),
    }
}

/// Signal 0 probes for existence without delivering anything. A process we
/// are not allowed to signal still exists.
fn pid_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("updater.lock")
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);

        let lock = InstanceLock::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());

        // Reacquirable after release.
        let _lock = InstanceLock::acquire(&path).unwrap();
    }

    #[test]
    fn live_owner_blocks_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        match InstanceLock::acquire(&path) {
            Err(UpdateError::AlreadyRunning { pid }) => {
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        // The foreign lock is left in place.
        assert!(path.exists());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);

        // A pid that has certainly exited by the time we probe it.
        let mut child = Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(&path, format!("{dead_pid}\n")).unwrap();

        let _lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn corrupt_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        fs::write(&path, "not a pid\n").unwrap();

        let _lock = InstanceLock::acquire(&path).unwrap();
    }
}
