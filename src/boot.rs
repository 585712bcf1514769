use std::path::Path;

use tracing::{info, warn};

use crate::bcd::{find_entry_for_vhd, normalize_vhd_path, same_guid};
use crate::db::{AppSettings, Database};
use crate::error::{AppError, Result};
use crate::host::{AttachedVolumes, Host};
use crate::models::{Node, NodeStatus};
use crate::status::StatusReconciler;
use crate::tree::NodeTree;

/// Owns every change to boot entries and to `Node::bcd_guid`.
pub struct BootConfigManager<'a> {
    host: &'a Host,
}

impl<'a> BootConfigManager<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self { host }
    }

    /// Install boot files from an attached system volume and return the entry
    /// the boot store registered for `vhd`, described as `description`.
    pub fn create_entry(
        &self,
        vhd: &Path,
        system_root: &Path,
        description: &str,
    ) -> Result<Option<String>> {
        self.host.boot.install_boot_files(system_root)?;
        let entries = self.host.boot.enumerate()?;
        let Some(entry) = find_entry_for_vhd(&entries, &vhd.to_string_lossy()) else {
            warn!("no boot entry references {}", vhd.display());
            return Ok(None);
        };
        if let Err(err) = self.host.boot.set_description(&entry.identifier, description) {
            warn!("failed to describe entry {}: {err}", entry.identifier);
        }
        Ok(Some(entry.identifier.clone()))
    }

    /// Replace the node's boot entry. `None` when the disk has no volume to
    /// boot from.
    pub fn repair_bcd(
        &self,
        db: &mut Database,
        tree: &mut NodeTree,
        node_id: &str,
    ) -> Result<Option<String>> {
        let node = tree.require(node_id)?.clone();
        let Some(guid) = self.regenerate(&node)? else {
            info!("repair_bcd node={node_id}: no bootable volume");
            return Ok(None);
        };
        self.store_guid(db, tree, node_id, Some(&guid), "repair_bcd")?;
        info!("repair_bcd node={node_id} guid={guid}");
        Ok(Some(guid))
    }

    /// Keep a valid entry, or create one the way `repair_bcd` does.
    pub fn add_bcd_entry(
        &self,
        db: &mut Database,
        tree: &mut NodeTree,
        node_id: &str,
        description: Option<String>,
    ) -> Result<Option<String>> {
        let description = description
            .map(|d| validate_description(&d))
            .transpose()?;
        let node = tree.require(node_id)?.clone();
        let existing = match node.bcd_guid.as_deref() {
            Some(guid) if self.entry_exists(guid)? => Some(guid.to_string()),
            _ => None,
        };
        let guid = match existing {
            Some(guid) => guid,
            None => match self.repair_bcd(db, tree, node_id)? {
                Some(guid) => guid,
                None => return Ok(None),
            },
        };
        if let Some(description) = description {
            self.host.boot.set_description(&guid, &description)?;
            db.record_op(Some(node_id), "update_bcd_description", &description)?;
        }
        Ok(Some(guid))
    }

    pub fn update_bcd_description(
        &self,
        db: &mut Database,
        tree: &NodeTree,
        node_id: &str,
        description: &str,
    ) -> Result<()> {
        let description = validate_description(description)?;
        let node = tree.require(node_id)?;
        let guid = node
            .bcd_guid
            .as_deref()
            .ok_or_else(|| AppError::NotFound(format!("node {node_id} has no boot entry")))?;
        self.host.boot.set_description(guid, &description)?;
        db.record_op(Some(node_id), "update_bcd_description", &description)?;
        Ok(())
    }

    /// Remove the node's entry from the boot store and forget its guid.
    pub fn delete_bcd(&self, db: &mut Database, tree: &mut NodeTree, node_id: &str) -> Result<()> {
        let node = tree.require(node_id)?;
        let guid = node
            .bcd_guid
            .clone()
            .ok_or_else(|| AppError::NotFound(format!("node {node_id} has no boot entry")))?;
        if self.entry_exists(&guid)? {
            self.host.boot.delete_entry(&guid)?;
        } else {
            info!("delete_bcd node={node_id}: {guid} already gone from the boot store");
        }
        self.store_guid(db, tree, node_id, None, "delete_bcd")
    }

    /// Best-effort removal used while tearing a node down.
    pub fn discard_entry(&self, node: &Node) {
        if let Some(guid) = node.bcd_guid.as_deref() {
            if let Err(err) = self.host.boot.delete_entry(guid) {
                warn!("node={} failed to delete boot entry {guid}: {err}", node.id);
            }
        }
    }

    pub fn set_bootsequence_and_reboot(
        &self,
        db: &mut Database,
        tree: &NodeTree,
        node_id: &str,
    ) -> Result<AppSettings> {
        let node = tree.require(node_id)?;
        let guid = node
            .bcd_guid
            .clone()
            .ok_or_else(|| AppError::NotFound(format!("node {node_id} has no boot entry")))?;
        if !self.host.power.is_elevated() {
            return Err(AppError::Permission(
                "changing the boot sequence requires administrator rights".into(),
            ));
        }
        match StatusReconciler::new(self.host).status_of(node, tree) {
            NodeStatus::Normal => {}
            NodeStatus::Mounted => {
                return Err(AppError::Conflict(format!(
                    "{} is mounted; detach it before booting into it",
                    node.path
                )))
            }
            other => {
                return Err(AppError::Conflict(format!(
                    "node {node_id} cannot be booted while {}",
                    other.as_str()
                )))
            }
        }
        self.host.boot.set_boot_sequence(&guid)?;
        let settings = db.record_boot_target(node_id, &guid)?;
        info!("bootsequence node={node_id} guid={guid}");
        self.host.power.request_reboot()?;
        Ok(settings)
    }

    fn entry_exists(&self, guid: &str) -> Result<bool> {
        Ok(self
            .host
            .boot
            .enumerate()?
            .iter()
            .any(|e| same_guid(&e.identifier, guid)))
    }

    /// Attach the disk (if needed), drop stale entries and register a new one.
    fn regenerate(&self, node: &Node) -> Result<Option<String>> {
        let vhd = Path::new(&node.path);
        if !vhd.try_exists()? {
            return Ok(None);
        }
        let was_attached = self.host.disks.is_attached(vhd)?;
        let volumes = self.host.disks.attach(vhd)?;
        let result = self.register_fresh(node, &volumes);
        if !was_attached {
            if let Err(err) = self.host.disks.detach(vhd) {
                warn!("node={} detach after repair failed: {err}", node.id);
            }
        }
        result
    }

    fn register_fresh(&self, node: &Node, volumes: &AttachedVolumes) -> Result<Option<String>> {
        let Some(system_root) = volumes.system.as_deref() else {
            return Ok(None);
        };
        let needle = normalize_vhd_path(&node.path);
        for entry in self.host.boot.enumerate()? {
            let stale_path = entry
                .vhd_path
                .as_deref()
                .map(|p| normalize_vhd_path(p) == needle)
                .unwrap_or(false);
            let stale_guid = node
                .bcd_guid
                .as_deref()
                .map(|g| same_guid(g, &entry.identifier))
                .unwrap_or(false);
            if stale_path || stale_guid {
                if let Err(err) = self.host.boot.delete_entry(&entry.identifier) {
                    warn!("failed to drop stale entry {}: {err}", entry.identifier);
                }
            }
        }
        self.create_entry(Path::new(&node.path), system_root, &node.name)?
            .map(Some)
            .ok_or_else(|| {
                AppError::Resource(format!(
                    "boot store has no entry for {} after bcdboot",
                    node.path
                ))
            })
    }

    fn store_guid(
        &self,
        db: &mut Database,
        tree: &mut NodeTree,
        node_id: &str,
        guid: Option<&str>,
        action: &str,
    ) -> Result<()> {
        db.set_node_bcd(node_id, guid, action)?;
        if let Some(node) = tree.get_mut(node_id) {
            node.bcd_guid = guid.map(str::to_string);
        }
        Ok(())
    }
}

fn validate_description(description: &str) -> Result<String> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("boot entry description is empty".into()));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(AppError::Validation(
            "boot entry description contains control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}
