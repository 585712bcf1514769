use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::{
    db::AppSettings,
    error::{AppError, Result},
    host::Host,
    logging::init_tracing,
    models::WimImageInfo,
    paths::AppPaths,
    provision,
    recents::{RecentStatus, RecentWorkspace, RecentsRegistry},
    tree::normalize_path,
    workspace::{OperationLock, Workspace},
};

/// Process-wide state: the active workspace handle (if any) plus the
/// capabilities, the operation lock and the recents list shared by every
/// workspace.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<RwLock<Option<Arc<Workspace>>>>,
    host: Host,
    op_lock: OperationLock,
    recents: RecentsRegistry,
}

impl SharedState {
    pub fn new(host: Host, recents: RecentsRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            host,
            op_lock: OperationLock::default(),
            recents,
        }
    }

    /// Open (or create) the workspace at `root` and make it the active one.
    /// Waits for any operation still running on the previous workspace.
    pub fn initialize(&self, root: PathBuf, locale: Option<String>) -> Result<AppSettings> {
        if let Err(err) = validate_root(&root) {
            if self.recents.contains(&root).unwrap_or(false) {
                self.remember(&root, degraded_status(&root), locale, None);
            }
            return Err(err);
        }

        let result = {
            let _op = self.op_lock.lock().expect("operation lock poisoned");
            self.open(&root, locale.as_deref())
                .and_then(|ws| ws.summary_held(locale.as_deref()))
        };
        match result {
            Ok((settings, count)) => {
                let count = u32::try_from(count).ok();
                self.remember(&root, RecentStatus::Ok, Some(settings.locale.clone()), count);
                Ok(settings)
            }
            Err(err) => {
                self.remember(&root, degraded_status(&root), locale, None);
                Err(err)
            }
        }
    }

    /// Reuse the active handle for the same root, otherwise open and swap in a
    /// new one. The caller holds the operation lock.
    fn open(&self, root: &Path, locale: Option<&str>) -> Result<Arc<Workspace>> {
        if let Some(ws) = self.current() {
            if normalize_path(&ws.paths().root().to_string_lossy())
                == normalize_path(&root.to_string_lossy())
            {
                return Ok(ws);
            }
        }

        let paths = AppPaths::new(root);
        paths.ensure_layout().map_err(|e| {
            AppError::Validation(format!("cannot use {} as a workspace: {e}", root.display()))
        })?;
        if let Err(err) = init_tracing(&paths.ops_log_path()) {
            warn!("logging unavailable: {err}");
        }
        let ws = Arc::new(Workspace::open(
            paths,
            self.host.clone(),
            locale,
            self.op_lock.clone(),
        )?);
        *self.inner.write().expect("state lock poisoned") = Some(ws.clone());
        Ok(ws)
    }

    fn remember(
        &self,
        root: &Path,
        status: RecentStatus,
        locale: Option<String>,
        node_count: Option<u32>,
    ) {
        if let Err(err) = self.recents.touch(root, status, locale, node_count) {
            warn!("failed to update recent workspaces: {err}");
        }
    }

    fn current(&self) -> Option<Arc<Workspace>> {
        self.inner.read().expect("state lock poisoned").clone()
    }

    pub fn workspace(&self) -> Result<Arc<Workspace>> {
        self.current().ok_or(AppError::RootNotInitialized)
    }

    pub fn get_settings(&self) -> Result<Option<AppSettings>> {
        self.current().map(|ws| ws.settings()).transpose()
    }

    pub fn check_admin(&self) -> bool {
        self.host.power.is_elevated()
    }

    pub fn list_wim_images(&self, image_path: &str) -> Result<Vec<WimImageInfo>> {
        provision::list_wim_images(&self.host, image_path)
    }

    pub fn recents(&self) -> &RecentsRegistry {
        &self.recents
    }

    pub fn list_recent_workspaces(&self) -> Result<Vec<RecentWorkspace>> {
        self.recents.list()
    }
}

/// Recents status for a root that could not be opened.
fn degraded_status(root: &Path) -> RecentStatus {
    if root.is_dir() {
        RecentStatus::InitFailed
    } else {
        RecentStatus::MissingRoot
    }
}

fn validate_root(root: &Path) -> Result<()> {
    if root.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(AppError::Validation("workspace path is empty".into()));
    }
    if !root.is_absolute() {
        return Err(AppError::Validation(format!(
            "workspace path must be absolute: {}",
            root.display()
        )));
    }
    if root.exists() && !root.is_dir() {
        return Err(AppError::Validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(())
}
