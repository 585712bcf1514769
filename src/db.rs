use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Node, NodeStatus};
use crate::paths::AppPaths;

/// Bumped whenever the table layout changes in a way older builds cannot read.
pub const SCHEMA_VERSION: i64 = 1;

const NODE_COLUMNS: &str =
    "id, parent_id, name, path, bcd_guid, desc, created_at, status, boot_files_ready";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSettings {
    pub root_path: String,
    pub locale: String,
    pub seq_counter: i64,
    pub last_boot_guid: Option<String>,
}

/// Workspace state file. Every mutation runs inside one SQLite transaction,
/// so an interrupted write leaves the previous committed state intact.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(paths: &AppPaths) -> Result<Self> {
        let db_path = paths.state_db_path();
        let conn = Connection::open(&db_path).map_err(|e| {
            AppError::State(format!("cannot open {}: {e}", db_path.display()))
        })?;
        let mut db = Self { conn };
        db.run_migrations()
            .map_err(|e| AppError::State(format!("{}: {e}", db_path.display())))?;
        db.ensure_settings(paths.root())?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(AppError::State(format!(
                "state file schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                root_path TEXT NOT NULL DEFAULT '',
                locale TEXT NOT NULL DEFAULT 'zh-CN',
                seq_counter INTEGER NOT NULL DEFAULT 1,
                last_boot_guid TEXT
            );
            INSERT OR IGNORE INTO settings (id, root_path, locale, seq_counter) VALUES (1, '', 'zh-CN', 1);

            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                name TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                bcd_guid TEXT,
                desc TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                boot_files_ready INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);

            CREATE TABLE IF NOT EXISTS ops (
                id TEXT PRIMARY KEY,
                node_id TEXT,
                ts TEXT NOT NULL,
                action TEXT NOT NULL,
                result TEXT NOT NULL,
                detail TEXT
            );
            "#,
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
        Ok(())
    }

    fn ensure_settings(&mut self, root: &Path) -> Result<()> {
        let root_str = root_str(root)?;
        self.conn.execute(
            "UPDATE settings SET root_path = COALESCE(NULLIF(root_path, ''), ?1) WHERE id = 1",
            params![root_str],
        )?;
        Ok(())
    }

    pub fn update_root_path(&mut self, root: &Path) -> Result<()> {
        let root_str = root_str(root)?;
        self.conn.execute(
            "UPDATE settings SET root_path = ?1 WHERE id = 1",
            params![root_str],
        )?;
        Ok(())
    }

    pub fn update_locale(&mut self, locale: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE settings SET locale = ?1 WHERE id = 1",
            params![locale],
        )?;
        Ok(())
    }

    pub fn get_settings(&self) -> Result<AppSettings> {
        let settings = self.conn.query_row(
            "SELECT root_path, locale, seq_counter, last_boot_guid FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(AppSettings {
                    root_path: row.get(0)?,
                    locale: row.get(1)?,
                    seq_counter: row.get(2)?,
                    last_boot_guid: row.get(3)?,
                })
            },
        )?;
        Ok(settings)
    }

    /// Sequence number the next created node will claim.
    pub fn peek_next_seq(&self) -> Result<i64> {
        Ok(self.get_settings()?.seq_counter + 1)
    }

    /// Insert a freshly provisioned node and claim its sequence number.
    pub fn insert_node(&mut self, node: &Node, action: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("UPDATE settings SET seq_counter = seq_counter + 1", [])?;
        tx.execute(
            &format!("INSERT INTO nodes ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                node.id,
                node.parent_id,
                node.name,
                node.path,
                node.bcd_guid,
                node.desc,
                node.created_at,
                node.status.as_str(),
                node.boot_files_ready as i32
            ],
        )?;
        insert_op(&tx, Some(&node.id), action, &node.path)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist the derived fields of a reconciliation pass.
    pub fn update_statuses(&mut self, updates: &[(String, NodeStatus, bool)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("UPDATE nodes SET status = ?1, boot_files_ready = ?2 WHERE id = ?3")?;
            for (id, status, ready) in updates {
                stmt.execute(params![status.as_str(), *ready as i32, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_node_bcd(&mut self, id: &str, bcd_guid: Option<&str>, action: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE nodes SET bcd_guid = ?1 WHERE id = ?2",
            params![bcd_guid, id],
        )?;
        insert_op(&tx, Some(id), action, bcd_guid.unwrap_or_default())?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_boot_target(&mut self, node_id: &str, guid: &str) -> Result<AppSettings> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE settings SET last_boot_guid = ?1, seq_counter = seq_counter + 1 WHERE id = 1",
            params![guid],
        )?;
        insert_op(&tx, Some(node_id), "bootsequence_reboot", guid)?;
        tx.commit()?;
        self.get_settings()
    }

    pub fn fetch_nodes(&self) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], node_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_nodes(&mut self, ids: &[String], root_id: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        }
        insert_op(
            &tx,
            Some(root_id),
            "delete_subtree",
            &format!("count={}", ids.len()),
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_op(&mut self, node_id: Option<&str>, action: &str, detail: &str) -> Result<()> {
        insert_op(&self.conn, node_id, action, detail)
    }

    pub fn op_count(&self, action: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM ops WHERE action = ?1",
            params![action],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn insert_op(conn: &Connection, node_id: Option<&str>, action: &str, detail: &str) -> Result<()> {
    let ts: DateTime<Utc> = Utc::now();
    conn.execute(
        "INSERT INTO ops (id, node_id, ts, action, result, detail) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            node_id,
            ts.to_rfc3339(),
            action,
            "ok",
            detail
        ],
    )?;
    Ok(())
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        bcd_guid: row.get(4)?,
        desc: row.get(5)?,
        created_at: row.get(6)?,
        status: NodeStatus::from_stored(&row.get::<_, String>(7)?),
        boot_files_ready: row.get::<_, i32>(8)? != 0,
    })
}

fn root_str(root: &Path) -> Result<&str> {
    root.to_str()
        .ok_or_else(|| AppError::Validation("root path is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, AppPaths, Database) {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        let db = Database::open(&paths).unwrap();
        (dir, paths, db)
    }

    fn sample_node(id: &str, parent: Option<&str>) -> Node {
        Node {
            id: id.into(),
            parent_id: parent.map(Into::into),
            name: id.into(),
            path: format!("C:\\ws\\base\\{id}.vhdx"),
            bcd_guid: None,
            desc: None,
            created_at: Utc::now(),
            status: NodeStatus::Normal,
            boot_files_ready: true,
        }
    }

    #[test]
    fn fresh_database_has_default_settings() {
        let (_dir, paths, db) = open_temp();
        let settings = db.get_settings().unwrap();
        assert_eq!(settings.root_path, paths.root().to_str().unwrap());
        assert_eq!(settings.seq_counter, 1);
        assert_eq!(settings.last_boot_guid, None);
    }

    #[test]
    fn insert_node_bumps_sequence_and_journals() {
        let (_dir, _paths, mut db) = open_temp();
        assert_eq!(db.peek_next_seq().unwrap(), 2);
        db.insert_node(&sample_node("a", None), "create_base").unwrap();
        assert_eq!(db.get_settings().unwrap().seq_counter, 2);
        assert_eq!(db.op_count("create_base").unwrap(), 1);

        let nodes = db.fetch_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].boot_files_ready);
    }

    #[test]
    fn duplicate_path_is_rejected_without_bumping_sequence() {
        let (_dir, _paths, mut db) = open_temp();
        db.insert_node(&sample_node("a", None), "create_base").unwrap();
        let mut dup = sample_node("b", None);
        dup.path = "C:\\ws\\base\\a.vhdx".into();
        assert!(db.insert_node(&dup, "create_base").is_err());
        assert_eq!(db.get_settings().unwrap().seq_counter, 2);
        assert_eq!(db.fetch_nodes().unwrap().len(), 1);
    }

    #[test]
    fn statuses_and_boot_target_persist_across_reopen() {
        let (_dir, paths, mut db) = open_temp();
        db.insert_node(&sample_node("a", None), "create_base").unwrap();
        db.update_statuses(&[("a".into(), NodeStatus::MissingBcd, false)])
            .unwrap();
        db.record_boot_target("a", "{guid}").unwrap();
        drop(db);

        let db = Database::open(&paths).unwrap();
        let node = &db.fetch_nodes().unwrap()[0];
        assert_eq!(node.status, NodeStatus::MissingBcd);
        assert!(!node.boot_files_ready);
        let settings = db.get_settings().unwrap();
        assert_eq!(settings.last_boot_guid.as_deref(), Some("{guid}"));
        assert_eq!(settings.seq_counter, 3);
    }

    #[test]
    fn newer_schema_is_a_state_error() {
        let (_dir, paths, db) = open_temp();
        db.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        drop(db);
        let err = Database::open(&paths).unwrap_err();
        assert!(matches!(err, AppError::State(_)), "{err}");
    }

    #[test]
    fn garbage_state_file_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        std::fs::write(paths.state_db_path(), vec![0x5a_u8; 4096]).unwrap();
        let err = Database::open(&paths).unwrap_err();
        assert!(matches!(err, AppError::State(_)), "{err}");
    }
}
