//! Host capabilities implemented with diskpart, DISM, bcdboot/bcdedit and
//! shutdown.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::bcd::{
    bcdedit_boot_sequence, bcdedit_delete, bcdedit_enum_all, bcdedit_set_description,
    parse_bcd_entries, run_bcdboot,
};
use crate::diskpart::{
    assign_partition_script, attach_list_vdisk_script, base_diskpart_script,
    detach_vdisk_script, detail_vdisk_script, diff_attach_list_script, parse_detail_vdisk,
    parse_list_partition, run_diskpart_script, system_partition,
};
use crate::dism::{apply_image, get_wim_info, parse_wim_info};
use crate::error::{AppError, Result};
use crate::host::{
    boot_files_present, AttachedVolumes, BootStore, ImageTool, PowerControl, VirtualDisks,
};
use crate::models::{BcdEntry, WimImageInfo};
use crate::sys::{spawn_detached, CommandOutput};
use crate::tree::normalize_path;

pub struct DiskpartDisks {
    /// Generated diskpart scripts live here only while diskpart runs.
    scripts_dir: PathBuf,
    /// Drive letters this process assigned, keyed by normalized VHD path.
    letters: Mutex<HashMap<String, char>>,
}

impl DiskpartDisks {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Result<Self> {
        let scripts_dir = scripts_dir.into();
        fs::create_dir_all(&scripts_dir)?;
        Ok(Self {
            scripts_dir,
            letters: Mutex::new(HashMap::new()),
        })
    }

    fn run_script(&self, name: &str, script: &str) -> Result<CommandOutput> {
        let mut file = tempfile::Builder::new()
            .prefix(name)
            .suffix(".txt")
            .tempfile_in(&self.scripts_dir)?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        let res = run_diskpart_script(file.path())?;
        res.ensure_success("diskpart")?;
        Ok(res)
    }

    fn remember_letter(&self, vhd: &Path, letter: char) {
        self.letters
            .lock()
            .expect("letter map poisoned")
            .insert(normalize_path(&vhd.to_string_lossy()), letter);
    }

    fn known_letter(&self, vhd: &Path) -> Option<char> {
        self.letters
            .lock()
            .expect("letter map poisoned")
            .get(&normalize_path(&vhd.to_string_lossy()))
            .copied()
    }

    fn forget_letter(&self, vhd: &Path) -> Option<char> {
        self.letters
            .lock()
            .expect("letter map poisoned")
            .remove(&normalize_path(&vhd.to_string_lossy()))
    }

    /// Give the system partition of an attached disk a drive letter.
    fn mount_system_partition(&self, vhd: &Path, list_output: &str) -> Result<AttachedVolumes> {
        let parts = parse_list_partition(list_output);
        let Some(partition) = system_partition(&parts) else {
            return Ok(AttachedVolumes::default());
        };
        let letter = free_drive_letter()?;
        self.run_script(
            "assign-system-",
            &assign_partition_script(vhd, partition, letter),
        )?;
        self.remember_letter(vhd, letter);
        Ok(AttachedVolumes {
            system: Some(drive_root(letter)),
        })
    }
}

impl VirtualDisks for DiskpartDisks {
    fn create_base(&self, vhd: &Path, size_gb: u64) -> Result<AttachedVolumes> {
        let letter = free_drive_letter()?;
        self.run_script(
            "create-base-",
            &base_diskpart_script(vhd, size_gb, letter),
        )?;
        self.remember_letter(vhd, letter);
        Ok(AttachedVolumes {
            system: Some(drive_root(letter)),
        })
    }

    fn create_diff(&self, vhd: &Path, parent: &Path) -> Result<AttachedVolumes> {
        let res = self.run_script("create-diff-", &diff_attach_list_script(vhd, parent))?;
        self.mount_system_partition(vhd, &res.stdout)
    }

    fn attach(&self, vhd: &Path) -> Result<AttachedVolumes> {
        if let Some(letter) = self.known_letter(vhd) {
            return Ok(AttachedVolumes {
                system: Some(drive_root(letter)),
            });
        }
        let res = self.run_script("attach-", &attach_list_vdisk_script(vhd))?;
        self.mount_system_partition(vhd, &res.stdout)
    }

    fn detach(&self, vhd: &Path) -> Result<()> {
        let letters: Vec<char> = self.forget_letter(vhd).into_iter().collect();
        self.run_script("detach-", &detach_vdisk_script(vhd, &letters))?;
        Ok(())
    }

    fn is_attached(&self, vhd: &Path) -> Result<bool> {
        let res = self.run_script("detail-vdisk-", &detail_vdisk_script(vhd))?;
        Ok(parse_detail_vdisk(&res.stdout).attached())
    }

    fn detect_boot_files(&self, vhd: &Path) -> Result<Option<bool>> {
        if !self.is_attached(vhd)? {
            return Ok(None);
        }
        Ok(self
            .known_letter(vhd)
            .map(|letter| boot_files_present(&drive_root(letter))))
    }
}

pub struct DismImages;

impl ImageTool for DismImages {
    fn list_images(&self, image: &Path) -> Result<Vec<WimImageInfo>> {
        let res = get_wim_info(image)?;
        if !res.success() {
            return Err(AppError::Validation(format!(
                "{} is not a readable image file: {}",
                image.display(),
                res.stdout.trim().lines().last().unwrap_or_default()
            )));
        }
        Ok(parse_wim_info(&res.stdout))
    }

    fn apply_image(&self, image: &Path, index: u32, target: &Path) -> Result<()> {
        apply_image(image, index, target)?.ensure_success("dism")
    }
}

pub struct BcdeditStore;

impl BootStore for BcdeditStore {
    fn install_boot_files(&self, system_root: &Path) -> Result<()> {
        run_bcdboot(system_root)?.ensure_success("bcdboot")
    }

    fn enumerate(&self) -> Result<Vec<BcdEntry>> {
        let res = bcdedit_enum_all()?;
        res.ensure_success("bcdedit")?;
        Ok(parse_bcd_entries(&res.stdout))
    }

    fn delete_entry(&self, guid: &str) -> Result<()> {
        bcdedit_delete(guid)?.ensure_success("bcdedit")
    }

    fn set_description(&self, guid: &str, description: &str) -> Result<()> {
        bcdedit_set_description(guid, description)?.ensure_success("bcdedit")
    }

    fn set_boot_sequence(&self, guid: &str) -> Result<()> {
        bcdedit_boot_sequence(guid)?.ensure_success("bcdedit")
    }
}

pub struct ShutdownPower;

impl PowerControl for ShutdownPower {
    fn is_elevated(&self) -> bool {
        #[cfg(windows)]
        {
            is_elevated::is_elevated()
        }
        #[cfg(not(windows))]
        {
            true
        }
    }

    fn request_reboot(&self) -> Result<()> {
        spawn_detached("shutdown", &["/r", "/t", "0"])
    }
}

fn drive_root(letter: char) -> PathBuf {
    PathBuf::from(format!("{letter}:\\"))
}

/// Highest unused drive letter, leaving A-F alone.
fn free_drive_letter() -> Result<char> {
    ('G'..='Z')
        .rev()
        .find(|letter| !drive_root(*letter).exists())
        .ok_or_else(|| AppError::Resource("no free drive letter to mount the disk".into()))
}
