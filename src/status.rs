use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::host::{Host, VirtualDisks};
use crate::models::{BcdEntry, Node, NodeStatus};
use crate::tree::NodeTree;

/// Boot store identifiers seen by one reconciliation pass, or the reason the
/// store could not be read.
pub type BcdSnapshot = std::result::Result<HashSet<String>, String>;

pub fn snapshot_from(entries: Result<Vec<BcdEntry>>) -> BcdSnapshot {
    entries
        .map(|list| {
            list.into_iter()
                .map(|e| e.identifier.trim().to_ascii_lowercase())
                .collect()
        })
        .map_err(|e| e.to_string())
}

/// Everything a status check may look at for one node.
pub struct CheckContext<'a> {
    pub node: &'a Node,
    pub tree: &'a NodeTree,
    pub bcd: &'a BcdSnapshot,
    pub disks: &'a dyn VirtualDisks,
}

type StatusCheck = fn(&CheckContext<'_>) -> Result<Option<NodeStatus>>;

/// Evaluated in order; the first check returning a status wins.
const CHECKS: [(&str, StatusCheck); 4] = [
    ("file", check_file),
    ("parent", check_parent),
    ("bcd", check_bcd),
    ("mounted", check_mounted),
];

fn check_file(ctx: &CheckContext<'_>) -> Result<Option<NodeStatus>> {
    let exists = Path::new(&ctx.node.path).try_exists()?;
    Ok((!exists).then_some(NodeStatus::MissingFile))
}

fn check_parent(ctx: &CheckContext<'_>) -> Result<Option<NodeStatus>> {
    Ok(match ctx.node.parent_id.as_deref() {
        Some(parent) if !ctx.tree.contains(parent) => Some(NodeStatus::MissingParent),
        _ => None,
    })
}

fn check_bcd(ctx: &CheckContext<'_>) -> Result<Option<NodeStatus>> {
    let Some(guid) = ctx.node.bcd_guid.as_deref().filter(|g| !g.trim().is_empty()) else {
        return Ok(Some(NodeStatus::MissingBcd));
    };
    let known = ctx
        .bcd
        .as_ref()
        .map_err(|e| AppError::Resource(format!("boot store unavailable: {e}")))?;
    Ok((!known.contains(&guid.trim().to_ascii_lowercase())).then_some(NodeStatus::MissingBcd))
}

fn check_mounted(ctx: &CheckContext<'_>) -> Result<Option<NodeStatus>> {
    let attached = ctx.disks.is_attached(Path::new(&ctx.node.path))?;
    Ok(attached.then_some(NodeStatus::Mounted))
}

/// Status of one node. A failing check marks the node `error` and skips the
/// remaining checks.
pub fn evaluate(ctx: &CheckContext<'_>) -> NodeStatus {
    for (name, check) in CHECKS {
        match check(ctx) {
            Ok(Some(status)) => {
                debug!("node={} check={name} status={}", ctx.node.id, status.as_str());
                return status;
            }
            Ok(None) => {}
            Err(err) => {
                warn!("node={} check={name} failed: {err}", ctx.node.id);
                return NodeStatus::Error;
            }
        }
    }
    NodeStatus::Normal
}

/// `boot_files_ready` for one node: re-checked when the disk is attached,
/// otherwise the cached value.
pub fn detect_boot_files(node: &Node, disks: &dyn VirtualDisks) -> bool {
    let path = Path::new(&node.path);
    if !matches!(path.try_exists(), Ok(true)) {
        return false;
    }
    match disks.detect_boot_files(path) {
        Ok(Some(ready)) => ready,
        Ok(None) => node.boot_files_ready,
        Err(err) => {
            warn!("node={} boot file check failed: {err}", node.id);
            node.boot_files_ready
        }
    }
}

pub struct StatusReconciler<'a> {
    host: &'a Host,
}

impl<'a> StatusReconciler<'a> {
    pub fn new(host: &'a Host) -> Self {
        Self { host }
    }

    pub fn snapshot(&self) -> BcdSnapshot {
        snapshot_from(self.host.boot.enumerate())
    }

    /// Live status of a single node against a fresh boot store snapshot.
    pub fn status_of(&self, node: &Node, tree: &NodeTree) -> NodeStatus {
        let bcd = self.snapshot();
        evaluate(&CheckContext {
            node,
            tree,
            bcd: &bcd,
            disks: self.host.disks.as_ref(),
        })
    }

    /// Recompute and persist `status`/`boot_files_ready` for every node.
    pub fn scan(&self, db: &mut Database, tree: &mut NodeTree) -> Result<Vec<Node>> {
        let bcd = self.snapshot();
        if let Err(err) = &bcd {
            warn!("boot store enumeration failed: {err}");
        }
        let mut updates = Vec::with_capacity(tree.len());
        for node in tree.nodes() {
            let status = evaluate(&CheckContext {
                node: &node,
                tree,
                bcd: &bcd,
                disks: self.host.disks.as_ref(),
            });
            let ready = detect_boot_files(&node, self.host.disks.as_ref());
            updates.push((node.id.clone(), status, ready));
        }
        db.update_statuses(&updates)?;
        for (id, status, ready) in updates {
            if let Some(node) = tree.get_mut(&id) {
                node.status = status;
                node.boot_files_ready = ready;
            }
        }
        Ok(tree.nodes())
    }
}
