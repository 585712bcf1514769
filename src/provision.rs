use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::boot::BootConfigManager;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::host::{boot_files_present, Host};
use crate::models::{Node, NodeStatus, WimImageInfo};
use crate::paths::AppPaths;
use crate::status::StatusReconciler;
use crate::tree::NodeTree;

pub const MIN_BASE_SIZE_GB: u64 = 20;
pub const MAX_BASE_SIZE_GB: u64 = 64 * 1024;
pub const MAX_NAME_LEN: usize = 64;

/// Inspect an image container and list the editions it holds.
pub fn list_wim_images(host: &Host, image_path: &str) -> Result<Vec<WimImageInfo>> {
    let trimmed = image_path.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("image path is empty".into()));
    }
    let path = Path::new(trimmed);
    if !path.try_exists()? {
        return Err(AppError::NotFound(format!("image file {trimmed}")));
    }
    if !path.is_file() {
        return Err(AppError::Validation(format!("{trimmed} is not a file")));
    }
    let images = host.images.list_images(path)?;
    if images.is_empty() {
        return Err(AppError::Validation(format!("{trimmed} contains no images")));
    }
    Ok(images)
}

/// A disk being provisioned. Unless committed, dropping it detaches the disk,
/// removes any boot entry registered for it and deletes the file.
struct StagedDisk<'a> {
    host: &'a Host,
    path: PathBuf,
    guid: Option<String>,
    committed: bool,
}

impl<'a> StagedDisk<'a> {
    fn new(host: &'a Host, path: PathBuf) -> Self {
        Self {
            host,
            path,
            guid: None,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagedDisk<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        warn!("rolling back partially created {}", self.path.display());
        if self.path.exists() {
            if let Err(err) = self.host.disks.detach(&self.path) {
                warn!("detach during rollback failed: {err}");
            }
        }
        if let Some(guid) = self.guid.as_deref() {
            if let Err(err) = self.host.boot.delete_entry(guid) {
                warn!("failed to remove boot entry {guid} during rollback: {err}");
            }
        }
        if self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to delete {}: {err}", self.path.display());
            }
        }
    }
}

pub struct DiskProvisioner<'a> {
    paths: &'a AppPaths,
    host: &'a Host,
}

impl<'a> DiskProvisioner<'a> {
    pub fn new(paths: &'a AppPaths, host: &'a Host) -> Self {
        Self { paths, host }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_base(
        &self,
        db: &mut Database,
        tree: &mut NodeTree,
        name: &str,
        desc: Option<String>,
        wim_file: &str,
        wim_index: u32,
        size_gb: u64,
    ) -> Result<Node> {
        let name = validate_name(name)?;
        if !(MIN_BASE_SIZE_GB..=MAX_BASE_SIZE_GB).contains(&size_gb) {
            return Err(AppError::Validation(format!(
                "size must be between {MIN_BASE_SIZE_GB} and {MAX_BASE_SIZE_GB} GB, got {size_gb}"
            )));
        }
        let images = list_wim_images(self.host, wim_file)?;
        if !images.iter().any(|img| img.index == wim_index) {
            let available: Vec<String> = images.iter().map(|i| i.index.to_string()).collect();
            return Err(AppError::Validation(format!(
                "image index {wim_index} not in {wim_file} (available: {})",
                available.join(", ")
            )));
        }

        let vhd_path = self.allocate_path(db, tree, &self.paths.base_dir(), &name)?;
        let mut staged = StagedDisk::new(self.host, vhd_path.clone());

        let volumes = self.host.disks.create_base(&vhd_path, size_gb)?;
        let system = volumes
            .system
            .ok_or_else(|| AppError::Resource("new disk exposes no system volume".into()))?;
        self.host
            .images
            .apply_image(Path::new(wim_file.trim()), wim_index, &system)?;
        staged.guid = BootConfigManager::new(self.host).create_entry(&vhd_path, &system, &name)?;
        let boot_files_ready = boot_files_present(&system);
        self.host.disks.detach(&vhd_path)?;

        let node = self.new_node(None, name, desc, &vhd_path, staged.guid.clone(), boot_files_ready);
        db.insert_node(&node, "create_base")?;
        tree.add(node.clone())?;
        staged.commit();
        info!("create_base id={} path={}", node.id, node.path);
        Ok(node)
    }

    pub fn create_diff(
        &self,
        db: &mut Database,
        tree: &mut NodeTree,
        parent_id: &str,
        name: &str,
        desc: Option<String>,
    ) -> Result<Node> {
        let name = validate_name(name)?;
        let parent = tree
            .get(parent_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("parent node {parent_id}")))?;
        match StatusReconciler::new(self.host).status_of(&parent, tree) {
            NodeStatus::Normal => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "parent {parent_id} is {}; it cannot back a differencing disk",
                    other.as_str()
                )))
            }
        }
        if let Some(broken) = tree
            .ancestors_of(parent_id)
            .into_iter()
            .find(|a| !Path::new(&a.path).exists())
        {
            return Err(AppError::Conflict(format!(
                "backing chain is broken: {} is missing",
                broken.path
            )));
        }

        let vhd_path = self.allocate_path(db, tree, &self.paths.diff_dir(), &name)?;
        let mut staged = StagedDisk::new(self.host, vhd_path.clone());

        let volumes = self
            .host
            .disks
            .create_diff(&vhd_path, Path::new(&parent.path))?;
        let system = volumes.system.ok_or_else(|| {
            AppError::Resource("differencing disk exposes no system volume".into())
        })?;
        staged.guid = BootConfigManager::new(self.host).create_entry(&vhd_path, &system, &name)?;
        let boot_files_ready = boot_files_present(&system);
        self.host.disks.detach(&vhd_path)?;

        let node = self.new_node(
            Some(parent_id.to_string()),
            name,
            desc,
            &vhd_path,
            staged.guid.clone(),
            boot_files_ready,
        );
        db.insert_node(&node, "create_diff")?;
        tree.add(node.clone())?;
        staged.commit();
        info!("create_diff id={} parent={parent_id}", node.id);
        Ok(node)
    }

    /// Pick `<dir>/NNNN-<slug>.vhdx` for the next sequence number.
    fn allocate_path(
        &self,
        db: &Database,
        tree: &NodeTree,
        dir: &Path,
        name: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let seq = db.peek_next_seq()?;
        let path = dir.join(format!("{seq:04}-{}.vhdx", slug(name)));
        if path.exists() || tree.find_by_path(&path.to_string_lossy()).is_some() {
            return Err(AppError::Conflict(format!(
                "{} already exists",
                path.display()
            )));
        }
        Ok(path)
    }

    fn new_node(
        &self,
        parent_id: Option<String>,
        name: String,
        desc: Option<String>,
        path: &Path,
        bcd_guid: Option<String>,
        boot_files_ready: bool,
    ) -> Node {
        let status = if bcd_guid.is_some() {
            NodeStatus::Normal
        } else {
            NodeStatus::MissingBcd
        };
        Node {
            id: Uuid::new_v4().to_string(),
            parent_id,
            name,
            path: path.to_string_lossy().to_string(),
            bcd_guid,
            desc: desc
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            created_at: Utc::now(),
            status,
            boot_files_ready,
        }
    }
}

pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("name is empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| c.is_control() || r#"\/:*?"<>|"#.contains(*c))
    {
        return Err(AppError::Validation(format!(
            "name contains invalid character {bad:?}"
        )));
    }
    Ok(trimmed.to_string())
}

/// File-name fragment for a node name.
fn slug(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        "node".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[test]
    fn names_are_trimmed_and_checked() {
        assert_eq!(validate_name("  win11 ").unwrap(), "win11");
        assert!(validate_name("   ").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert_eq!(validate_name("测试系统").unwrap(), "测试系统");
    }

    #[test]
    fn slug_keeps_file_names_portable() {
        assert_eq!(slug("Win11 Pro"), "win11-pro");
        assert_eq!(slug("测试"), "node");
        assert_eq!(slug("dev_box-2"), "dev_box-2");
    }

    #[test]
    fn list_images_validates_path_before_asking_the_tool() {
        let fake = FakeHost::new();
        let host = fake.host();
        assert!(matches!(
            list_wim_images(&host, " "),
            Err(AppError::Validation(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.wim");
        assert!(matches!(
            list_wim_images(&host, &missing.to_string_lossy()),
            Err(AppError::NotFound(_))
        ));

        let junk = dir.path().join("junk.bin");
        fs::write(&junk, b"junk").unwrap();
        assert!(matches!(
            list_wim_images(&host, &junk.to_string_lossy()),
            Err(AppError::Validation(_))
        ));

        let wim = dir.path().join("install.wim");
        fs::write(&wim, b"wim").unwrap();
        fake.images.register(&wim, 3);
        let images = list_wim_images(&host, &wim.to_string_lossy()).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(images[2].index, 3);
    }
}
