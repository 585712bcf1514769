use std::path::Path;

use crate::error::Result;
use crate::sys::{run_elevated_command, CommandOutput};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VhdDetail {
    /// Disk number while attached.
    pub disk_number: Option<u32>,
}

impl VhdDetail {
    pub fn attached(&self) -> bool {
        self.disk_number.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub index: u32,
    pub kind: String,
    pub size_mb: Option<u64>,
}

/// Run a diskpart script stored at `script_path`.
pub fn run_diskpart_script(script_path: &Path) -> Result<CommandOutput> {
    run_elevated_command(
        "diskpart",
        &["/s", script_path.to_string_lossy().as_ref()],
        None,
    )
}

/// Generate script to create and partition a base VHDX with GPT + EFI/MSR/Primary.
/// Only the system partition receives a drive letter.
pub fn base_diskpart_script(vhd_path: &Path, size_gb: u64, sys_letter: char) -> String {
    let size_mb = size_gb * 1024;
    format!(
        r#"
create vdisk file="{vhd}" maximum={size_mb} type=expandable
select vdisk file="{vhd}"
attach vdisk
convert gpt
create partition efi size=100
format quick fs=fat32 label="EFI"
create partition msr size=16
create partition primary
format quick fs=ntfs label="System"
assign letter={sys_letter}
list partition
"#,
        vhd = vhd_path.display(),
    )
}

/// Script to create a differencing VHDX and list partitions (no letter assignment).
pub fn diff_attach_list_script(child: &Path, parent: &Path) -> String {
    format!(
        r#"
create vdisk file="{child}" parent="{parent}"
select vdisk file="{child}"
attach vdisk
list partition
"#,
        child = child.display(),
        parent = parent.display()
    )
}

/// Attach an existing VHD and list its partitions.
pub fn attach_list_vdisk_script(vhd_path: &Path) -> String {
    format!(
        r#"
select vdisk file="{vhd}"
attach vdisk
list partition
"#,
        vhd = vhd_path.display()
    )
}

/// Script to assign a letter to one partition on the currently attached VHD.
pub fn assign_partition_script(vhd_path: &Path, partition: u32, letter: char) -> String {
    [
        format!(r#"select vdisk file="{}""#, vhd_path.display()),
        format!("select partition {partition}"),
        format!("assign letter={letter} noerr"),
    ]
    .join("\n")
}

pub fn detach_vdisk_script(vhd_path: &Path, letters: &[char]) -> String {
    let mut lines = Vec::new();
    let select_vhd = format!(r#"select vdisk file="{}""#, vhd_path.display());
    lines.push(select_vhd.clone());
    for letter in letters {
        lines.push(format!("select volume {letter}"));
        lines.push(format!("remove letter={letter} noerr"));
    }
    lines.push(select_vhd);
    lines.push("detach vdisk noerr".into());
    lines.join("\n")
}

pub fn detail_vdisk_script(vhd_path: &Path) -> String {
    format!(
        r#"
select vdisk file="{vhd}"
detail vdisk
"#,
        vhd = vhd_path.display()
    )
}

/// Parse output of `detail vdisk`.
pub fn parse_detail_vdisk(output: &str) -> VhdDetail {
    let mut detail = VhdDetail::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.starts_with("associated disk") {
            detail.disk_number = value.parse::<u32>().ok();
        }
    }
    detail
}

/// Parse `list partition` output.
pub fn parse_list_partition(output: &str) -> Vec<PartitionInfo> {
    let mut parts = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim_start_matches(['*', ' ']);
        if !trimmed.starts_with("Partition") {
            continue;
        }
        let cols: Vec<&str> = trimmed.split_whitespace().collect();
        if cols.len() < 3 {
            continue;
        }
        let Ok(index) = cols[1].parse::<u32>() else {
            continue;
        };
        let size_mb = match (cols.get(3), cols.get(4)) {
            (Some(num), Some(unit)) => parse_size_mb(num, unit),
            _ => None,
        };
        parts.push(PartitionInfo {
            index,
            kind: cols[2].to_string(),
            size_mb,
        });
    }
    parts
}

/// The OS partition: the largest primary partition.
pub fn system_partition(parts: &[PartitionInfo]) -> Option<u32> {
    parts
        .iter()
        .filter(|p| p.kind.eq_ignore_ascii_case("primary"))
        .max_by_key(|p| p.size_mb.unwrap_or(0))
        .map(|p| p.index)
}

fn parse_size_mb(number: &str, unit: &str) -> Option<u64> {
    let value = number.parse::<u64>().ok()?;
    match unit.to_ascii_lowercase().as_str() {
        "kb" => Some(value / 1024),
        "mb" => Some(value),
        "gb" => Some(value * 1024),
        "tb" => Some(value * 1024 * 1024),
        _ => None,
    }
}
