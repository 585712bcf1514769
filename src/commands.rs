use std::path::PathBuf;

use serde::Serialize;
use tauri::async_runtime::spawn_blocking;
use tauri::State;

use crate::{
    db::AppSettings,
    error::{CommandError, ErrorKind, Result},
    models::{Node, WimImageInfo},
    recents::RecentWorkspace,
    state::SharedState,
};

type CmdResult<T> = std::result::Result<T, CommandError>;

#[derive(Serialize)]
pub struct InitResult {
    pub settings: AppSettings,
}

#[derive(Serialize)]
pub struct CreateNodeResponse {
    pub node: Node,
}

/// Run blocking workspace work off the async runtime.
async fn run_blocking_cmd<T, F>(f: F) -> CmdResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| CommandError {
            kind: ErrorKind::Resource,
            message: format!("failed to join async task: {e}"),
        })?
        .map_err(CommandError::from)
}

#[tauri::command]
pub async fn check_admin(state: State<'_, SharedState>) -> CmdResult<bool> {
    Ok(state.check_admin())
}

#[tauri::command]
pub async fn init_root(
    root_path: String,
    locale: Option<String>,
    state: State<'_, SharedState>,
) -> CmdResult<InitResult> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        let settings = state.initialize(PathBuf::from(root_path), locale)?;
        Ok(InitResult { settings })
    })
    .await
}

#[tauri::command]
pub async fn get_settings(state: State<'_, SharedState>) -> CmdResult<Option<AppSettings>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.get_settings()).await
}

#[tauri::command]
pub async fn scan_workspace(state: State<'_, SharedState>) -> CmdResult<Vec<Node>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.workspace()?.scan()).await
}

#[tauri::command]
pub async fn list_nodes(state: State<'_, SharedState>) -> CmdResult<Vec<Node>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || Ok(state.workspace()?.list_nodes())).await
}

#[tauri::command]
pub async fn list_wim_images(
    image_path: String,
    state: State<'_, SharedState>,
) -> CmdResult<Vec<WimImageInfo>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.list_wim_images(&image_path)).await
}

#[tauri::command]
pub async fn create_base_vhd(
    name: String,
    desc: Option<String>,
    wim_file: String,
    wim_index: u32,
    size_gb: u64,
    state: State<'_, SharedState>,
) -> CmdResult<CreateNodeResponse> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        let node = state
            .workspace()?
            .create_base(&name, desc, &wim_file, wim_index, size_gb)?;
        Ok(CreateNodeResponse { node })
    })
    .await
}

#[tauri::command]
pub async fn create_diff_vhd(
    parent_id: String,
    name: String,
    desc: Option<String>,
    state: State<'_, SharedState>,
) -> CmdResult<CreateNodeResponse> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        let node = state.workspace()?.create_diff(&parent_id, &name, desc)?;
        Ok(CreateNodeResponse { node })
    })
    .await
}

#[tauri::command]
pub async fn set_bootsequence_and_reboot(
    node_id: String,
    state: State<'_, SharedState>,
) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        state.workspace()?.set_bootsequence_and_reboot(&node_id)?;
        Ok(())
    })
    .await
}

#[tauri::command]
pub async fn delete_subtree(node_id: String, state: State<'_, SharedState>) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        state.workspace()?.delete_subtree(&node_id)?;
        Ok(())
    })
    .await
}

#[tauri::command]
pub async fn repair_bcd(
    node_id: String,
    state: State<'_, SharedState>,
) -> CmdResult<Option<String>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.workspace()?.repair_bcd(&node_id)).await
}

#[tauri::command]
pub async fn delete_bcd(node_id: String, state: State<'_, SharedState>) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.workspace()?.delete_bcd(&node_id)).await
}

#[tauri::command]
pub async fn add_bcd_entry(
    node_id: String,
    description: Option<String>,
    state: State<'_, SharedState>,
) -> CmdResult<Option<String>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.workspace()?.add_bcd_entry(&node_id, description)).await
}

#[tauri::command]
pub async fn update_bcd_description(
    node_id: String,
    description: String,
    state: State<'_, SharedState>,
) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || {
        state
            .workspace()?
            .update_bcd_description(&node_id, &description)
    })
    .await
}

#[tauri::command]
pub async fn list_recent_workspaces(
    state: State<'_, SharedState>,
) -> CmdResult<Vec<RecentWorkspace>> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.list_recent_workspaces()).await
}

#[tauri::command]
pub async fn remove_recent_workspace(path: String, state: State<'_, SharedState>) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.recents().remove(&path)).await
}

#[tauri::command]
pub async fn clear_recent_workspaces(state: State<'_, SharedState>) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.recents().clear()).await
}

#[tauri::command]
pub async fn pin_recent_workspace(
    path: String,
    pinned: bool,
    state: State<'_, SharedState>,
) -> CmdResult<()> {
    let state = state.inner().clone();
    run_blocking_cmd(move || state.recents().set_pinned(&path, pinned)).await
}
