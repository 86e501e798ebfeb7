// OS process spawning for isolates.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Creates isolate processes and answers liveness questions about them.
pub trait ProcessSpawner: Send + Sync {
    /// Start a process with the given argument vector and return its pid.
    fn create_process(&self, args: &[String]) -> io::Result<u32>;

    /// Pid of the calling process.
    fn own_process_id(&self) -> u32 {
        std::process::id()
    }

    /// Whether `pid` is still running. Spawners that cannot tell say yes.
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Spawns isolates as child processes of a fixed launcher program.
pub struct OsProcessSpawner {
    program: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl OsProcessSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Number of children still held for reaping.
    pub fn tracked_children(&self) -> usize {
        self.children.lock().len()
    }
}

impl ProcessSpawner for OsProcessSpawner {
    fn create_process(&self, args: &[String]) -> io::Result<u32> {
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to spawn {}: {}", self.program.display(), e),
                )
            })?;
        let pid = child.id();
        tracing::debug!(pid, program = %self.program.display(), "spawned isolate process");
        self.children.lock().insert(pid, child);
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut children = self.children.lock();
        if let Some(child) = children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::debug!(pid, %status, "isolate process exited");
                    children.remove(&pid);
                    false
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to poll isolate process");
                    true
                }
            };
        }
        drop(children);

        // not one of ours: probe with signal 0
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        let rc = unsafe { libc::kill(raw, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

impl Drop for OsProcessSpawner {
    fn drop(&mut self) {
        for (pid, child) in self.children.get_mut().iter_mut() {
            if let Ok(None) = child.try_wait() {
                tracing::debug!(pid, "killing isolate process on shutdown");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
