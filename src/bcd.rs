use std::path::Path;

use crate::error::Result;
use crate::models::BcdEntry;
use crate::sys::{run_elevated_command, CommandOutput};

/// Run bcdboot using the host's default system BCD store (omit /s and /f).
pub fn run_bcdboot(system_root: &Path) -> Result<CommandOutput> {
    let windows_dir = system_root.join("Windows");
    let sys_arg = windows_dir.to_string_lossy();
    run_elevated_command("bcdboot", &[sys_arg.as_ref(), "/d"], None)
}

pub fn bcdedit_enum_all() -> Result<CommandOutput> {
    run_elevated_command("bcdedit", &["/enum", "all", "/v"], None)
}

pub fn bcdedit_boot_sequence(guid: &str) -> Result<CommandOutput> {
    run_elevated_command("bcdedit", &["/bootsequence", guid], None)
}

pub fn bcdedit_delete(guid: &str) -> Result<CommandOutput> {
    run_elevated_command("bcdedit", &["/delete", guid], None)
}

pub fn bcdedit_set_description(guid: &str, desc: &str) -> Result<CommandOutput> {
    run_elevated_command("bcdedit", &["/set", guid, "description", desc], None)
}

/// Split `bcdedit /enum all /v` output into entries.
pub fn parse_bcd_entries(bcd_output: &str) -> Vec<BcdEntry> {
    let mut entries: Vec<BcdEntry> = Vec::new();
    for line in bcd_output.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("identifier") {
            if let Some(guid) = line.split_whitespace().nth(1) {
                entries.push(BcdEntry {
                    identifier: guid.trim().to_string(),
                    description: None,
                    vhd_path: None,
                });
            }
            continue;
        }
        let Some(current) = entries.last_mut() else {
            continue;
        };
        if lower.starts_with("description") {
            let value = line["description".len()..].trim();
            if !value.is_empty() {
                current.description = Some(value.to_string());
            }
        } else if current.vhd_path.is_none() {
            if let Some(dev_path) = parse_vhd_device_path(line) {
                current.vhd_path = Some(dev_path);
            }
        }
    }
    entries
}

/// Identifier of the first entry whose device references `vhd_path`.
pub fn find_entry_for_vhd<'a>(entries: &'a [BcdEntry], vhd_path: &str) -> Option<&'a BcdEntry> {
    let needle = normalize_vhd_path(vhd_path);
    entries.iter().find(|e| {
        e.vhd_path
            .as_deref()
            .map(|p| normalize_vhd_path(p) == needle)
            .unwrap_or(false)
    })
}

pub fn same_guid(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Extract raw VHD path from a device/osdevice line; strips trailing ",locate=..." if present.
fn parse_vhd_device_path(line: &str) -> Option<String> {
    let lower = line.to_ascii_lowercase();
    if !(lower.starts_with("device") || lower.starts_with("osdevice")) {
        return None;
    }
    let before_comma = line.split_once(',').map(|(h, _)| h).unwrap_or(line);
    let lower_before = before_comma.to_ascii_lowercase();
    let pos = lower_before.find("vhd=")?;
    let path_part = before_comma[pos + 4..].trim();
    let token = path_part.split_whitespace().next().unwrap_or("");
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Normalize VHD paths for comparison: remove brackets, unify separators, drop \\?\ prefix, lowercase.
pub fn normalize_vhd_path(path: &str) -> String {
    let mut normalized = path.trim().trim_start_matches("\\\\?\\").replace('/', "\\");
    if normalized.starts_with('[') {
        if let Some(end) = normalized.find(']') {
            let drive = &normalized[1..end];
            let rest = &normalized[end + 1..];
            normalized = format!("{drive}{rest}");
        }
    }
    normalized.replace(['[', ']'], "").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENUM_ALL: &str = r#"
Windows Boot Manager
--------------------
identifier              {9dea862c-5cdd-4e70-acc1-f32b344d4795}
device                  partition=\Device\HarddiskVolume1
description             Windows Boot Manager
displayorder            {b2721d73-1db4-4c62-bf78-c548a880142d}

Windows Boot Loader
-------------------
identifier              {b2721d73-1db4-4c62-bf78-c548a880142d}
device                  partition=C:
description             Windows 11
osdevice                partition=C:

Windows Boot Loader
-------------------
identifier              {4f1c3a5e-0000-4d4b-9a51-2b5bd1c4e001}
device                  vhd=[D:]\ws\base\0002-win11.vhdx,locate=custom:12000002
path                    \Windows\system32\winload.efi
description             win11
osdevice                vhd=[D:]\ws\base\0002-win11.vhdx,locate=custom:22000002
"#;

    #[test]
    fn entries_carry_description_and_vhd() {
        let entries = parse_bcd_entries(ENUM_ALL);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].description.as_deref(), Some("Windows Boot Manager"));
        assert_eq!(entries[1].vhd_path, None);
        assert_eq!(entries[2].vhd_path.as_deref(), Some("[D:]\\ws\\base\\0002-win11.vhdx"));
        assert_eq!(entries[2].description.as_deref(), Some("win11"));
    }

    #[test]
    fn vhd_lookup_ignores_case_brackets_and_separators() {
        let entries = parse_bcd_entries(ENUM_ALL);
        let found = find_entry_for_vhd(&entries, "d:/WS/base/0002-win11.vhdx").unwrap();
        assert!(same_guid(
            &found.identifier,
            "{4F1C3A5E-0000-4D4B-9A51-2B5BD1C4E001}"
        ));
        assert!(find_entry_for_vhd(&entries, "D:\\ws\\diff\\0003-snap.vhdx").is_none());
    }

    #[test]
    fn normalize_strips_verbatim_prefix() {
        assert_eq!(
            normalize_vhd_path("\\\\?\\D:\\WS\\a.vhdx"),
            normalize_vhd_path("[D:]\\ws\\a.vhdx")
        );
    }
}
