//! Mounting, checking and formatting the persistent data partition.
use std::path::{Path, PathBuf};

use runner::Executor;
use tracing::{error, info, warn};

pub mod errors;
mod kind;
mod mounter;

use errors::*;
pub use kind::{FsKind, FsckOutcome};
pub use mounter::{Mounter, SystemMounter};

/// The application cache and write-through mount points of one partition.
/// Both are always mounted and unmounted together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountPair {
    pub cache: PathBuf,
    pub write_through: PathBuf,
}

impl MountPair {
    pub fn new(cache: impl Into<PathBuf>, write_through: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
            write_through: write_through.into(),
        }
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.cache, &self.write_through]
    }
}

pub struct FsOps<M, E> {
    pair: MountPair,
    tools_dir: PathBuf,
    mounter: M,
    executor: E,
}

impl<M: Mounter, E: Executor> FsOps<M, E> {
    pub fn new(pair: MountPair, tools_dir: impl Into<PathBuf>, mounter: M, executor: E) -> Self {
        Self {
            pair,
            tools_dir: tools_dir.into(),
            mounter,
            executor,
        }
    }

    pub fn pair(&self) -> &MountPair {
        &self.pair
    }

    pub fn mounter(&self) -> &M {
        &self.mounter
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    fn tool(&self, prefix: &str, kind: FsKind) -> Result<String, FsError> {
        let name = kind.name().ok_or(FsError::InvalidKind)?;
        let path = self.tools_dir.join(format!("{prefix}.{name}"));
        Ok(path.to_string_lossy().into_owned())
    }

    /// Mount `device` on both paths of the pair. A failure on one path does
    /// not keep the other from being attempted.
    pub fn mount(&mut self, device: &str, kind: FsKind, flags: u64) -> Result<(), FsError> {
        let fstype = kind.name().ok_or(FsError::InvalidKind)?;
        let mut failed = Vec::new();
        for target in self.pair.paths() {
            match self.mounter.mount(device, target, fstype, flags) {
                Ok(()) => info!(device, target = %target.display(), fstype, "Mounted"),
                Err(e) => {
                    warn!(device, target = %target.display(), fstype, "Mount failed: {e}");
                    failed.push(target.to_path_buf());
                }
            }
        }
        pair_result("mount", failed)
    }

    pub fn unmount(&mut self, flags: i32) -> Result<(), FsError> {
        let mut failed = Vec::new();
        for target in self.pair.paths() {
            match self.mounter.unmount(target, flags) {
                Ok(()) => info!(target = %target.display(), "Unmounted"),
                Err(e) => {
                    warn!(target = %target.display(), "Unmount failed: {e}");
                    failed.push(target.to_path_buf());
                }
            }
        }
        pair_result("unmount", failed)
    }

    /// Run `fsck.<kind> <device> -p -v` and classify its exit code.
    pub fn check(&mut self, device: &str, kind: FsKind) -> Result<FsckOutcome, FsError> {
        let argv = vec![
            self.tool("fsck", kind)?,
            device.to_string(),
            "-p".to_string(),
            "-v".to_string(),
        ];
        let code = self.executor.execute(&argv)?;
        let outcome = FsckOutcome::from_code(code);
        match outcome {
            FsckOutcome::Clean | FsckOutcome::Corrected => {
                info!(device, %kind, code, "fsck: {outcome}")
            }
            _ => warn!(device, %kind, code, "fsck: {outcome}"),
        }
        Ok(outcome)
    }

    /// Create a fresh filesystem of `kind` on `device`.
    pub fn format(&mut self, device: &str, kind: FsKind) -> Result<(), FsError> {
        let tool = self.tool("mkfs", kind)?;
        let argv = vec![tool.clone(), kind.force_flag().to_string(), device.to_string()];
        match self.executor.execute(&argv)? {
            0 => {
                info!(device, %kind, "Created new filesystem");
                Ok(())
            }
            code => {
                error!(device, %kind, code, "Failed to create filesystem");
                Err(FsError::ToolFailed { tool, code })
            }
        }
    }
}

fn pair_result(op: &'static str, failed: Vec<PathBuf>) -> Result<(), FsError> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(FsError::Pair { op, failed })
    }
}
