use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use memfs::config::{Cli, Command, MemFsConfig};
use memfs::error::FsError;
use memfs::fs::handles::HandleTable;
use memfs::fs::MemFs;
use memfs::shutdown::{self, ShutdownAction};

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}

/// Log to `log_file` and to stderr. `RUST_LOG` overrides the `info` default.
fn init_logging(log_file: &Path) -> WorkerGuard {
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_name = log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("memfs.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
    guard
}

/// Make sure `mountpoint` exists, is a directory and is not a dead mount.
fn prepare_mountpoint(mountpoint: &Path) -> Result<PathBuf, FsError> {
    if !mountpoint.exists() {
        std::fs::create_dir_all(mountpoint)?;
    }
    let mountpoint = std::fs::canonicalize(mountpoint)?;
    if !mountpoint.is_dir() {
        return Err(FsError::Mount(format!(
            "not a directory: {}",
            mountpoint.display()
        )));
    }
    if shutdown::is_stale_fuse_mount(&mountpoint) {
        return Err(FsError::Mount(format!(
            "{} is a stale FUSE mount (previous memfs session didn't clean up).\n\
             Fix with:  umount -f {}",
            mountpoint.display(),
            mountpoint.display(),
        )));
    }
    Ok(mountpoint)
}

/// Start the FUSE session on a background thread. When the kernel refuses
/// `allow_other`, retry with the mount restricted to its owner.
fn spawn_session(config: &MemFsConfig) -> Result<(fuser::BackgroundSession, Arc<HandleTable>), FsError> {
    // No DefaultPermissions: nodes report read-only modes, yet creating and
    // writing must still go through.
    let mut fuse_config = fuser::Config::default();
    fuse_config.mount_options = vec![
        fuser::MountOption::FSName(config.fs_name.clone()),
        fuser::MountOption::AutoUnmount,
    ];
    fuse_config.acl = fuser::SessionACL::All;

    let memfs = MemFs::new(config.clone());
    let handles = Arc::clone(&memfs.file_handles);
    match fuser::spawn_mount2(memfs, &config.mountpoint, &fuse_config) {
        Ok(session) => Ok((session, handles)),
        Err(e) if e.raw_os_error() == Some(libc::EPERM) || e.to_string().contains("allow_other") => {
            info!("Retrying mount without allow_other...");
            fuse_config.acl = fuser::SessionACL::Owner;
            let memfs = MemFs::new(config.clone());
            let handles = Arc::clone(&memfs.file_handles);
            fuser::spawn_mount2(memfs, &config.mountpoint, &fuse_config)
                .map(|session| (session, handles))
                .map_err(|e| FsError::Mount(e.to_string()))
        }
        Err(e) => Err(FsError::Mount(e.to_string())),
    }
}

fn mount(config: MemFsConfig) {
    info!(
        "memfs starting: fs_name={}, mountpoint={}, ttl={}s",
        config.fs_name,
        config.mountpoint.display(),
        config.ttl_secs
    );

    let (session, file_handles) = match spawn_session(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to mount: {}", e);
            std::process::exit(1);
        }
    };
    info!("memfs mounted at {}", config.mountpoint.display());

    match shutdown::wait_for_shutdown(&session.guard, &file_handles, &config.mountpoint) {
        ShutdownAction::ForceUnmount => {
            if let Err(e) = session.umount_and_join() {
                error!("Error during unmount, trying force unmount: {}", e);
                let _ = std::process::Command::new("umount")
                    .arg("-f")
                    .arg(&config.mountpoint)
                    .status();
            }
        }
        ShutdownAction::ExternalUnmount => {
            if let Err(e) = session.join() {
                error!("Error joining FUSE session: {}", e);
            }
        }
    }

    eprintln!("memfs: unmounted {}", config.mountpoint.display());
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            mountpoint,
            fs_name,
            log_file,
            ttl_secs,
        } => {
            let mountpoint = prepare_mountpoint(&mountpoint)
                .unwrap_or_else(|e| fail(format!("mountpoint {:?}: {}", mountpoint, e)));
            let _log_guard = init_logging(&log_file);
            mount(MemFsConfig {
                mountpoint,
                fs_name,
                log_file,
                ttl_secs,
            });
        }
        Command::Unmount { mountpoint } => {
            let mountpoint = std::fs::canonicalize(&mountpoint)
                .unwrap_or_else(|e| fail(format!("mountpoint {:?}: {}", mountpoint, e)));
            if let Err(msg) = shutdown::unmount(&mountpoint) {
                fail(msg);
            }
        }
    }
}
