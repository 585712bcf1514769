//! In-process fakes for the host capabilities. Disks are real files; each disk
//! gets a directory standing in for its system volume.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::host::{
    AttachedVolumes, BootStore, Host, ImageTool, PowerControl, VirtualDisks, BOOT_ARTIFACTS,
};
use crate::models::{BcdEntry, WimImageInfo};
use crate::tree::normalize_path;

fn key(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"")?;
    Ok(())
}

#[derive(Default)]
pub struct FakeDisks {
    volumes_root: PathBuf,
    /// volume dir -> vhd path
    volumes: Mutex<HashMap<PathBuf, PathBuf>>,
    attached: Mutex<HashSet<String>>,
    broken_queries: Mutex<HashSet<String>>,
    pub fail_create: AtomicBool,
    pub no_system_volume: AtomicBool,
}

impl FakeDisks {
    fn volume_for(&self, vhd: &Path) -> PathBuf {
        let name = vhd
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.volumes_root.join(name)
    }

    fn register(&self, vhd: &Path) -> Result<PathBuf> {
        let volume = self.volume_for(vhd);
        fs::create_dir_all(&volume)?;
        self.volumes
            .lock()
            .unwrap()
            .insert(volume.clone(), vhd.to_path_buf());
        self.attached.lock().unwrap().insert(key(vhd));
        Ok(volume)
    }

    pub fn vhd_for_volume(&self, volume: &Path) -> Option<PathBuf> {
        self.volumes.lock().unwrap().get(volume).cloned()
    }

    pub fn mark_attached(&self, vhd: &Path) {
        self.attached.lock().unwrap().insert(key(vhd));
    }

    pub fn is_marked_attached(&self, vhd: &Path) -> bool {
        self.attached.lock().unwrap().contains(&key(vhd))
    }

    pub fn break_queries_for(&self, vhd: &Path) {
        self.broken_queries.lock().unwrap().insert(key(vhd));
    }
}

impl VirtualDisks for FakeDisks {
    fn create_base(&self, vhd: &Path, _size_gb: u64) -> Result<AttachedVolumes> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Resource("diskpart failed: simulated".into()));
        }
        fs::write(vhd, b"vhdx")?;
        let volume = self.register(vhd)?;
        Ok(AttachedVolumes {
            system: Some(volume),
        })
    }

    fn create_diff(&self, vhd: &Path, parent: &Path) -> Result<AttachedVolumes> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Resource("diskpart failed: simulated".into()));
        }
        if !parent.exists() {
            return Err(AppError::Resource(format!(
                "parent {} not found",
                parent.display()
            )));
        }
        fs::write(vhd, b"vhdx-diff")?;
        let volume = self.register(vhd)?;
        // Reads of unmodified blocks come from the parent.
        let parent_volume = self.volume_for(parent);
        for rel in BOOT_ARTIFACTS {
            if parent_volume.join(rel).is_file() {
                touch(&volume.join(rel))?;
            }
        }
        Ok(AttachedVolumes {
            system: Some(volume),
        })
    }

    fn attach(&self, vhd: &Path) -> Result<AttachedVolumes> {
        if !vhd.exists() {
            return Err(AppError::Resource(format!("{} not found", vhd.display())));
        }
        if self.no_system_volume.load(Ordering::SeqCst) {
            self.mark_attached(vhd);
            return Ok(AttachedVolumes::default());
        }
        let volume = self.register(vhd)?;
        Ok(AttachedVolumes {
            system: Some(volume),
        })
    }

    fn detach(&self, vhd: &Path) -> Result<()> {
        self.attached.lock().unwrap().remove(&key(vhd));
        Ok(())
    }

    fn is_attached(&self, vhd: &Path) -> Result<bool> {
        if self.broken_queries.lock().unwrap().contains(&key(vhd)) {
            return Err(AppError::Resource("detail vdisk failed: simulated".into()));
        }
        Ok(self.is_marked_attached(vhd))
    }

    fn detect_boot_files(&self, vhd: &Path) -> Result<Option<bool>> {
        if !self.is_attached(vhd)? {
            return Ok(None);
        }
        let volume = self.volume_for(vhd);
        Ok(Some(crate::host::boot_files_present(&volume)))
    }
}

#[derive(Default)]
pub struct FakeImages {
    images: Mutex<HashMap<String, Vec<WimImageInfo>>>,
    pub fail_apply: AtomicBool,
    /// How long each apply blocks.
    pub apply_delay_ms: AtomicU64,
    /// Applies currently in flight, and the most ever seen at once.
    pub applying: AtomicUsize,
    pub max_applying: AtomicUsize,
}

impl FakeImages {
    pub fn register(&self, image: &Path, count: u32) {
        let list = (1..=count)
            .map(|index| WimImageInfo {
                index,
                name: format!("Edition {index}"),
                description: None,
                size: Some("1,000 bytes".into()),
            })
            .collect();
        self.images.lock().unwrap().insert(key(image), list);
    }
}

impl ImageTool for FakeImages {
    fn list_images(&self, image: &Path) -> Result<Vec<WimImageInfo>> {
        self.images
            .lock()
            .unwrap()
            .get(&key(image))
            .cloned()
            .ok_or_else(|| {
                AppError::Validation(format!("{} is not a readable image file", image.display()))
            })
    }

    fn apply_image(&self, _image: &Path, _index: u32, target: &Path) -> Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(AppError::Resource("dism failed: simulated".into()));
        }
        let now = self.applying.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_applying.fetch_max(now, Ordering::SeqCst);
        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        let result = touch(&target.join("Windows/System32/winload.efi"));
        self.applying.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct FakeBoot {
    disks: Arc<FakeDisks>,
    entries: Mutex<Vec<BcdEntry>>,
    sequence: Mutex<Option<String>>,
    pub fail_enumerate: AtomicBool,
    pub fail_install: AtomicBool,
    /// bcdboot succeeds but registers nothing.
    pub register_nothing: AtomicBool,
}

impl FakeBoot {
    pub fn entries(&self) -> Vec<BcdEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn remove_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn boot_sequence(&self) -> Option<String> {
        self.sequence.lock().unwrap().clone()
    }
}

impl BootStore for FakeBoot {
    fn install_boot_files(&self, system_root: &Path) -> Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(AppError::Resource("bcdboot failed: simulated".into()));
        }
        touch(&system_root.join("Windows/Boot/EFI/bootmgfw.efi"))?;
        if self.register_nothing.load(Ordering::SeqCst) {
            return Ok(());
        }
        let vhd = self.disks.vhd_for_volume(system_root);
        self.entries.lock().unwrap().push(BcdEntry {
            identifier: format!("{{{}}}", Uuid::new_v4()),
            description: Some("Windows 11".into()),
            vhd_path: vhd.map(|p| p.to_string_lossy().to_string()),
        });
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<BcdEntry>> {
        if self.fail_enumerate.load(Ordering::SeqCst) {
            return Err(AppError::Resource("bcdedit failed: simulated".into()));
        }
        Ok(self.entries())
    }

    fn delete_entry(&self, guid: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| !e.identifier.eq_ignore_ascii_case(guid));
        if entries.len() == before {
            return Err(AppError::Resource(format!("bcdedit: {guid} not found")));
        }
        Ok(())
    }

    fn set_description(&self, guid: &str, description: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.identifier.eq_ignore_ascii_case(guid))
            .ok_or_else(|| AppError::Resource(format!("bcdedit: {guid} not found")))?;
        entry.description = Some(description.to_string());
        Ok(())
    }

    fn set_boot_sequence(&self, guid: &str) -> Result<()> {
        *self.sequence.lock().unwrap() = Some(guid.to_string());
        Ok(())
    }
}

pub struct FakePower {
    pub elevated: AtomicBool,
    pub reboots: AtomicUsize,
}

impl PowerControl for FakePower {
    fn is_elevated(&self) -> bool {
        self.elevated.load(Ordering::SeqCst)
    }

    fn request_reboot(&self) -> Result<()> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeHost {
    pub disks: Arc<FakeDisks>,
    pub images: Arc<FakeImages>,
    pub boot: Arc<FakeBoot>,
    pub power: Arc<FakePower>,
    _volumes: TempDir,
}

impl FakeHost {
    pub fn new() -> Self {
        let volumes = tempfile::tempdir().unwrap();
        let disks = Arc::new(FakeDisks {
            volumes_root: volumes.path().to_path_buf(),
            ..FakeDisks::default()
        });
        let boot = Arc::new(FakeBoot {
            disks: disks.clone(),
            entries: Mutex::new(Vec::new()),
            sequence: Mutex::new(None),
            fail_enumerate: AtomicBool::new(false),
            fail_install: AtomicBool::new(false),
            register_nothing: AtomicBool::new(false),
        });
        Self {
            disks,
            images: Arc::new(FakeImages::default()),
            boot,
            power: Arc::new(FakePower {
                elevated: AtomicBool::new(true),
                reboots: AtomicUsize::new(0),
            }),
            _volumes: volumes,
        }
    }

    pub fn host(&self) -> Host {
        Host {
            disks: self.disks.clone(),
            images: self.images.clone(),
            boot: self.boot.clone(),
            power: self.power.clone(),
        }
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}
