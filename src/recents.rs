use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::paths::state_db_path_for;
use crate::tree::normalize_path;

pub const MAX_RECENT: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecentStatus {
    Ok,
    MissingRoot,
    MissingStateDb,
    InitFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentWorkspace {
    pub path: String,
    pub last_opened_at: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    pub last_status: RecentStatus,
    #[serde(default)]
    pub node_count: Option<u32>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Per-user list of previously opened workspace roots, stored as JSON.
/// Never touches the workspaces it references.
#[derive(Debug, Clone)]
pub struct RecentsRegistry {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl RecentsRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Entries pinned-first, newest-first, with statuses refreshed from disk.
    pub fn list(&self) -> Result<Vec<RecentWorkspace>> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let mut items = self.load()?;
        let mut changed = false;
        for item in items.iter_mut() {
            let status = infer_status(item);
            if status != item.last_status {
                item.last_status = status;
                changed = true;
            }
        }
        sort_items(&mut items);
        if changed {
            self.save(&items)?;
        }
        Ok(items)
    }

    pub fn touch(
        &self,
        path: &Path,
        status: RecentStatus,
        locale: Option<String>,
        node_count: Option<u32>,
    ) -> Result<()> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let display = path.to_string_lossy().to_string();
        let key = normalize_path(&display);
        let mut items = self.load()?;
        let now = Utc::now();

        match items.iter_mut().find(|i| normalize_path(&i.path) == key) {
            Some(existing) => {
                existing.path = display;
                existing.last_opened_at = now;
                existing.last_status = status;
                if locale.is_some() {
                    existing.locale = locale;
                }
                if node_count.is_some() {
                    existing.node_count = node_count;
                }
            }
            None => items.push(RecentWorkspace {
                path: display,
                last_opened_at: now,
                pinned: false,
                last_status: status,
                node_count,
                locale,
            }),
        }

        sort_items(&mut items);
        prune(&mut items);
        self.save(&items)
    }

    /// Whether `path` is already remembered.
    pub fn contains(&self, path: &Path) -> Result<bool> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let key = normalize_path(&path.to_string_lossy());
        Ok(self.load()?.iter().any(|i| normalize_path(&i.path) == key))
    }

    pub fn set_pinned(&self, path: &str, pinned: bool) -> Result<()> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let key = normalize_path(path);
        let mut items = self.load()?;
        let item = items
            .iter_mut()
            .find(|i| normalize_path(&i.path) == key)
            .ok_or_else(|| AppError::NotFound(format!("recent workspace {path}")))?;
        item.pinned = pinned;
        sort_items(&mut items);
        self.save(&items)
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        let key = normalize_path(path);
        let mut items = self.load()?;
        items.retain(|i| normalize_path(&i.path) != key);
        self.save(&items)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().expect("recents lock poisoned");
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load(&self) -> Result<Vec<RecentWorkspace>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(items) => Ok(items),
            Err(err) => {
                warn!("ignoring unreadable {}: {err}", self.path.display());
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, items: &[RecentWorkspace]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(items)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }
}

fn infer_status(item: &RecentWorkspace) -> RecentStatus {
    let root = Path::new(&item.path);
    if !root.is_dir() {
        return RecentStatus::MissingRoot;
    }
    if !state_db_path_for(root).exists() {
        return RecentStatus::MissingStateDb;
    }
    match item.last_status {
        // The root came back since the last listing.
        RecentStatus::MissingRoot | RecentStatus::MissingStateDb => RecentStatus::Ok,
        other => other,
    }
}

fn recency(a: &RecentWorkspace, b: &RecentWorkspace) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.last_opened_at.cmp(&a.last_opened_at))
}

fn sort_items(items: &mut [RecentWorkspace]) {
    items.sort_by(recency);
}

/// Drop the oldest unpinned entries beyond `MAX_RECENT`. Expects sorted input.
fn prune(items: &mut Vec<RecentWorkspace>) {
    while items.len() > MAX_RECENT {
        match items.iter().rposition(|i| !i.pinned) {
            Some(idx) => {
                items.remove(idx);
            }
            None => break,
        }
    }
}
