//! Signal handling and unmount helpers for the `memfs` binary.
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::JoinHandle;

use nix::sys::signal::{signal, SigHandler, Signal};
use tracing::{debug, warn};

use crate::fs::handles::HandleTable;

/// Write end of the self-pipe the signal handler pokes.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

/// How long one poll of the signal pipe may block, in milliseconds.
const POLL_MS: i32 = 200;

/// While waiting on a busy mount, re-probe it every this many polls.
const PROBE_EVERY: u32 = 5;

/// Open handles listed when a mount is busy.
const BUSY_DISPLAY_CAP: usize = 10;

extern "C" fn on_signal(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// The user asked twice; tear the mount down regardless.
    ForceUnmount,
    /// The kernel mount is already gone, the session only needs joining.
    ExternalUnmount,
}

/// SIGINT/SIGTERM routed into a pipe that can be polled with a timeout.
struct SignalPipe {
    read_fd: libc::c_int,
    write_fd: libc::c_int,
}

impl SignalPipe {
    fn install() -> std::io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        SIGNAL_PIPE.store(fds[1], Ordering::Relaxed);
        unsafe {
            signal(Signal::SIGINT, SigHandler::Handler(on_signal)).ok();
            signal(Signal::SIGTERM, SigHandler::Handler(on_signal)).ok();
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Wait up to `timeout_ms` for a signal. Consumes it if one arrived.
    fn wait(&self, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        if unsafe { libc::poll(&mut pfd, 1, timeout_ms) } <= 0 {
            return false;
        }
        let mut buf = [0u8; 1];
        unsafe {
            libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, 1);
        }
        true
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        SIGNAL_PIPE.store(-1, Ordering::Relaxed);
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Plain `umount`. Succeeds only when nothing holds the mount.
pub fn try_unmount(mountpoint: &Path) -> bool {
    Command::new("umount")
        .arg(mountpoint)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn report_busy(file_handles: &HandleTable) {
    let open_files = file_handles.list_open();
    if open_files.is_empty() {
        eprintln!("memfs: mount is busy, processes are using the mountpoint");
    } else {
        eprintln!("memfs: mount is busy, {} open file(s):", open_files.len());
        for info in open_files.iter().take(BUSY_DISPLAY_CAP) {
            eprintln!("  {}  (inode {}, SID {})", info.name, info.ino, info.sid);
        }
        if open_files.len() > BUSY_DISPLAY_CAP {
            eprintln!("  and {} more...", open_files.len() - BUSY_DISPLAY_CAP);
        }
    }
    eprintln!("Close open files to unmount cleanly, or press ctrl-C again to force unmount.");
}

/// Block until the mount should go away.
///
/// A first signal unmounts straight away when the mount is idle. When it is
/// busy (open handles, a shell's cwd) we report what is open and keep
/// probing; a second signal forces the unmount. If the session thread ends
/// on its own, someone unmounted from outside.
pub fn wait_for_shutdown(
    guard: &JoinHandle<std::io::Result<()>>,
    file_handles: &HandleTable,
    mountpoint: &Path,
) -> ShutdownAction {
    let pipe = match SignalPipe::install() {
        Ok(pipe) => pipe,
        Err(e) => {
            warn!("Could not install signal handlers ({}), waiting for external unmount", e);
            while !guard.is_finished() {
                std::thread::sleep(std::time::Duration::from_millis(POLL_MS as u64));
            }
            return ShutdownAction::ExternalUnmount;
        }
    };

    let mut busy = false;
    let mut ticks: u32 = 0;
    loop {
        if pipe.wait(POLL_MS) {
            if busy {
                eprintln!("memfs: force unmounting...");
                return ShutdownAction::ForceUnmount;
            }
            if guard.is_finished() {
                return ShutdownAction::ExternalUnmount;
            }
            if try_unmount(mountpoint) {
                eprintln!("memfs: unmounting (received signal)...");
                return ShutdownAction::ExternalUnmount;
            }
            busy = true;
            report_busy(file_handles);
            continue;
        }

        if guard.is_finished() {
            debug!("FUSE session ended");
            return ShutdownAction::ExternalUnmount;
        }
        if busy {
            ticks += 1;
            if ticks % PROBE_EVERY == 0 && try_unmount(mountpoint) {
                eprintln!("memfs: all clear, unmounting...");
                return ShutdownAction::ExternalUnmount;
            }
        }
    }
}

/// True if `path` is listed as a FUSE mount but can no longer be read,
/// which is what a killed session leaves behind.
pub fn is_stale_fuse_mount(path: &Path) -> bool {
    let output = match Command::new("mount").output() {
        Ok(o) => o,
        Err(_) => return false,
    };
    let listing = String::from_utf8_lossy(&output.stdout);
    let path_str = path.to_string_lossy();
    let listed = listing
        .lines()
        .any(|line| line.contains(path_str.as_ref()) && line.contains("fuse"));
    listed && std::fs::read_dir(path).is_err()
}

enum UnmountOutcome {
    Done,
    Busy,
    Failed,
}

fn run_unmount(program: &str, args: &[&str]) -> UnmountOutcome {
    match Command::new(program).args(args).output() {
        Ok(o) if o.status.success() => UnmountOutcome::Done,
        Ok(o) => {
            let stderr = String::from_utf8_lossy(&o.stderr);
            let stdout = String::from_utf8_lossy(&o.stdout);
            if stderr.contains("busy") || stdout.contains("busy") {
                UnmountOutcome::Busy
            } else {
                UnmountOutcome::Failed
            }
        }
        Err(_) => UnmountOutcome::Failed,
    }
}

/// Unmount from a separate process: `umount`, then `diskutil` on macOS,
/// then `umount -f`. A busy mount stops the sequence without forcing.
pub fn unmount(mountpoint: &Path) -> Result<(), String> {
    let mp = mountpoint.to_string_lossy();
    eprintln!("Unmounting {}...", mp);

    let attempts: [(&str, Vec<&str>); 2] = [("umount", vec![&*mp]), ("diskutil", vec!["unmount", &*mp])];
    for (program, args) in attempts.iter() {
        match run_unmount(program, args) {
            UnmountOutcome::Done => {
                eprintln!("Successfully unmounted {}", mp);
                return Ok(());
            }
            UnmountOutcome::Busy => {
                return Err(format!(
                    "Mount point is busy. Make sure no shells or processes are using {}, then try again.",
                    mp
                ));
            }
            UnmountOutcome::Failed => continue,
        }
    }

    match run_unmount("umount", &["-f", &*mp]) {
        UnmountOutcome::Done => {
            eprintln!("Successfully unmounted {} (forced)", mp);
            Ok(())
        }
        _ => Err(format!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp)),
    }
}
