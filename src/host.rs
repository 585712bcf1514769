//! Capabilities the workspace needs from the machine. The system
//! implementations in [`crate::system`] shell out to the Windows tools; tests
//! plug in fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{BcdEntry, WimImageInfo};

/// Files whose presence on a system volume means it can be booted natively.
pub const BOOT_ARTIFACTS: [&str; 2] = [
    "Windows/Boot/EFI/bootmgfw.efi",
    "Windows/System32/winload.efi",
];

pub fn boot_files_present(system_root: &Path) -> bool {
    BOOT_ARTIFACTS
        .iter()
        .all(|rel| system_root.join(rel).is_file())
}

/// Volumes exposed by a disk while it is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedVolumes {
    /// Root of the OS volume (e.g. `S:\`), if the disk has one.
    pub system: Option<PathBuf>,
}

pub trait VirtualDisks: Send + Sync {
    /// Create an expandable GPT disk with EFI, MSR and system partitions and
    /// leave it attached.
    fn create_base(&self, vhd: &Path, size_gb: u64) -> Result<AttachedVolumes>;

    /// Create a differencing disk backed by `parent` and leave it attached.
    fn create_diff(&self, vhd: &Path, parent: &Path) -> Result<AttachedVolumes>;

    fn attach(&self, vhd: &Path) -> Result<AttachedVolumes>;

    fn detach(&self, vhd: &Path) -> Result<()>;

    fn is_attached(&self, vhd: &Path) -> Result<bool>;

    /// `None` when the disk is not attached and cannot be inspected without
    /// attaching it.
    fn detect_boot_files(&self, vhd: &Path) -> Result<Option<bool>>;
}

pub trait ImageTool: Send + Sync {
    fn list_images(&self, image: &Path) -> Result<Vec<WimImageInfo>>;

    fn apply_image(&self, image: &Path, index: u32, target: &Path) -> Result<()>;
}

pub trait BootStore: Send + Sync {
    /// Copy boot-loader files from the OS on `system_root` and register it in
    /// the machine's boot store.
    fn install_boot_files(&self, system_root: &Path) -> Result<()>;

    fn enumerate(&self) -> Result<Vec<BcdEntry>>;

    fn delete_entry(&self, guid: &str) -> Result<()>;

    fn set_description(&self, guid: &str, description: &str) -> Result<()>;

    /// One-time boot target for the next restart.
    fn set_boot_sequence(&self, guid: &str) -> Result<()>;
}

pub trait PowerControl: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// Ask the OS to restart. Returns once the request is issued.
    fn request_reboot(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct Host {
    pub disks: Arc<dyn VirtualDisks>,
    pub images: Arc<dyn ImageTool>,
    pub boot: Arc<dyn BootStore>,
    pub power: Arc<dyn PowerControl>,
}

impl Host {
    /// Host backed by the Windows command-line tools. `scripts_dir` receives
    /// generated diskpart scripts.
    pub fn system(scripts_dir: impl Into<PathBuf>) -> Result<Self> {
        let disks = Arc::new(crate::system::DiskpartDisks::new(scripts_dir)?);
        Ok(Self {
            disks,
            images: Arc::new(crate::system::DismImages),
            boot: Arc::new(crate::system::BcdeditStore),
            power: Arc::new(crate::system::ShutdownPower),
        })
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_files_need_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!boot_files_present(dir.path()));
        let first = dir.path().join(BOOT_ARTIFACTS[0]);
        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::write(&first, b"").unwrap();
        assert!(!boot_files_present(dir.path()));
        let second = dir.path().join(BOOT_ARTIFACTS[1]);
        std::fs::create_dir_all(second.parent().unwrap()).unwrap();
        std::fs::write(&second, b"").unwrap();
        assert!(boot_files_present(dir.path()));
    }
}
