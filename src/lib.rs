pub mod bcd;
#[cfg(feature = "gui")]
mod commands;
pub mod boot;
pub mod db;
pub mod diskpart;
pub mod dism;
pub mod error;
pub mod host;
pub mod logging;
pub mod models;
pub mod paths;
pub mod provision;
pub mod recents;
pub mod state;
pub mod status;
pub mod sys;
pub mod system;
#[cfg(test)]
pub(crate) mod testing;
pub mod tree;
pub mod workspace;

#[cfg(feature = "gui")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    use crate::host::Host;
    use crate::recents::RecentsRegistry;
    use crate::state::SharedState;

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let data_dir = app.path().app_local_data_dir()?;
            let host = Host::system(data_dir.join("scripts"))?;
            let recents = RecentsRegistry::new(data_dir.join("recents.json"));
            app.manage(SharedState::new(host, recents));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::check_admin,
            commands::get_settings,
            commands::init_root,
            commands::scan_workspace,
            commands::list_nodes,
            commands::list_wim_images,
            commands::create_base_vhd,
            commands::create_diff_vhd,
            commands::set_bootsequence_and_reboot,
            commands::delete_subtree,
            commands::repair_bcd,
            commands::delete_bcd,
            commands::add_bcd_entry,
            commands::update_bcd_description,
            commands::list_recent_workspaces,
            commands::remove_recent_workspace,
            commands::clear_recent_workspaces,
            commands::pin_recent_workspace
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
