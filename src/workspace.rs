use std::fs;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::boot::BootConfigManager;
use crate::db::{AppSettings, Database};
use crate::error::{AppError, Result};
use crate::host::Host;
use crate::models::Node;
use crate::paths::AppPaths;
use crate::provision::DiskProvisioner;
use crate::status::StatusReconciler;
use crate::tree::NodeTree;

/// Process-wide lock shared by every workspace handle. The machine has one
/// boot store and one set of disk tools, so at most one operation runs at a
/// time even across a workspace switch.
pub type OperationLock = Arc<Mutex<()>>;

struct WorkspaceState {
    db: Database,
    tree: NodeTree,
}

/// Held for the whole of one operation. Fields drop in order, so the state
/// lock is released before the operation lock.
struct Exclusive<'a> {
    state: MutexGuard<'a, WorkspaceState>,
    _op: MutexGuard<'a, ()>,
}

impl Deref for Exclusive<'_> {
    type Target = WorkspaceState;

    fn deref(&self) -> &WorkspaceState {
        &self.state
    }
}

impl DerefMut for Exclusive<'_> {
    fn deref_mut(&mut self) -> &mut WorkspaceState {
        &mut self.state
    }
}

/// The open workspace. Every operation holds the operation lock and `state`
/// for its whole duration, external tool calls included, so commands never
/// interleave.
pub struct Workspace {
    paths: AppPaths,
    host: Host,
    op_lock: OperationLock,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    /// Open the workspace at `paths`. Does not take `op_lock`; callers
    /// switching workspaces hold it around the open.
    pub fn open(
        paths: AppPaths,
        host: Host,
        locale: Option<&str>,
        op_lock: OperationLock,
    ) -> Result<Self> {
        paths.ensure_layout()?;
        let mut db = Database::open(&paths)?;
        db.update_root_path(paths.root())?;
        if let Some(locale) = locale {
            db.update_locale(locale)?;
        }
        let tree = NodeTree::from_nodes(db.fetch_nodes()?)?;
        db.record_op(None, "init_root", &paths.root().to_string_lossy())?;
        info!(
            "workspace opened root={} nodes={}",
            paths.root().display(),
            tree.len()
        );
        Ok(Self {
            paths,
            host,
            op_lock,
            state: Mutex::new(WorkspaceState { db, tree }),
        })
    }

    fn lock(&self) -> Exclusive<'_> {
        let op = self.op_lock.lock().expect("operation lock poisoned");
        Exclusive {
            state: self.state.lock().expect("workspace lock poisoned"),
            _op: op,
        }
    }

    /// Settings and node count after optionally switching the locale. The
    /// caller must already hold the operation lock.
    pub(crate) fn summary_held(&self, locale: Option<&str>) -> Result<(AppSettings, usize)> {
        let mut state = self.state.lock().expect("workspace lock poisoned");
        if let Some(locale) = locale {
            state.db.update_locale(locale)?;
        }
        Ok((state.db.get_settings()?, state.tree.len()))
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn settings(&self) -> Result<AppSettings> {
        self.lock().db.get_settings()
    }

    pub fn node_count(&self) -> usize {
        self.lock().tree.len()
    }

    /// Nodes as last reconciled, without asking the host.
    pub fn list_nodes(&self) -> Vec<Node> {
        self.lock().tree.nodes()
    }

    pub fn scan(&self) -> Result<Vec<Node>> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        let nodes = StatusReconciler::new(&self.host).scan(db, tree)?;
        info!("scan nodes={}", nodes.len());
        Ok(nodes)
    }

    pub fn create_base(
        &self,
        name: &str,
        desc: Option<String>,
        wim_file: &str,
        wim_index: u32,
        size_gb: u64,
    ) -> Result<Node> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        DiskProvisioner::new(&self.paths, &self.host)
            .create_base(db, tree, name, desc, wim_file, wim_index, size_gb)
    }

    pub fn create_diff(&self, parent_id: &str, name: &str, desc: Option<String>) -> Result<Node> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        DiskProvisioner::new(&self.paths, &self.host).create_diff(db, tree, parent_id, name, desc)
    }

    /// Tear down `node_id` and every descendant, children before parents.
    /// Stops at the first disk file that cannot be deleted; the nodes removed
    /// up to that point stay removed, so no survivor references a removed id.
    pub fn delete_subtree(&self, node_id: &str) -> Result<Vec<String>> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        let order = tree.subtree_leaves_first(node_id)?;
        let boot = BootConfigManager::new(&self.host);

        let mut removed = Vec::with_capacity(order.len());
        let mut failure = None;
        for id in &order {
            let Some(node) = tree.get(id) else { continue };
            let path = Path::new(&node.path);
            if path.exists() {
                if let Err(err) = self.host.disks.detach(path) {
                    warn!("node={id} detach before delete failed: {err}");
                }
            }
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    failure = Some(AppError::Resource(format!(
                        "cannot delete {}: {err}",
                        node.path
                    )));
                    break;
                }
            }
            // Only a node that is really going away loses its boot entry.
            boot.discard_entry(node);
            removed.push(id.clone());
        }

        db.delete_nodes(&removed, node_id)?;
        tree.remove_nodes(&removed);
        info!("delete_subtree root={node_id} removed={}", removed.len());
        match failure {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    pub fn repair_bcd(&self, node_id: &str) -> Result<Option<String>> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        BootConfigManager::new(&self.host).repair_bcd(db, tree, node_id)
    }

    pub fn delete_bcd(&self, node_id: &str) -> Result<()> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        BootConfigManager::new(&self.host).delete_bcd(db, tree, node_id)
    }

    pub fn add_bcd_entry(
        &self,
        node_id: &str,
        description: Option<String>,
    ) -> Result<Option<String>> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        BootConfigManager::new(&self.host).add_bcd_entry(db, tree, node_id, description)
    }

    pub fn update_bcd_description(&self, node_id: &str, description: &str) -> Result<()> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        BootConfigManager::new(&self.host).update_bcd_description(db, tree, node_id, description)
    }

    pub fn set_bootsequence_and_reboot(&self, node_id: &str) -> Result<AppSettings> {
        let mut guard = self.lock();
        let WorkspaceState { db, tree } = &mut *guard;
        BootConfigManager::new(&self.host).set_bootsequence_and_reboot(db, tree, node_id)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.paths.root())
            .finish_non_exhaustive()
    }
}
