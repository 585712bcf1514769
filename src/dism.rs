use std::path::Path;

use crate::error::Result;
use crate::models::WimImageInfo;
use crate::sys::{run_command, CommandOutput};

/// List images inside a WIM/ESD file via DISM /Get-WimInfo.
pub fn get_wim_info(image_path: &Path) -> Result<CommandOutput> {
    run_command(
        "dism",
        &[
            "/English",
            "/Get-WimInfo",
            &format!("/WimFile:{}", image_path.display()),
        ],
        None,
    )
}

/// Apply a WIM/ESD image to a target directory.
pub fn apply_image(image_path: &Path, index: u32, apply_dir: &Path) -> Result<CommandOutput> {
    run_command(
        "dism",
        &[
            "/English",
            "/Apply-Image",
            &format!("/ImageFile:{}", image_path.display()),
            &format!("/Index:{index}"),
            &format!("/ApplyDir:{}", apply_dir.display()),
        ],
        None,
    )
}

pub fn parse_wim_info(text: &str) -> Vec<WimImageInfo> {
    let mut result = Vec::new();
    let mut current: Option<WimImageInfo> = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key == "Index" {
            if let Some(info) = current.take() {
                result.push(info);
            }
            if let Ok(index) = value.parse::<u32>() {
                current = Some(WimImageInfo {
                    index,
                    name: String::new(),
                    description: None,
                    size: None,
                });
            }
        } else if let Some(info) = current.as_mut() {
            match key {
                "Name" => info.name = value.to_string(),
                "Description" if !value.is_empty() => info.description = Some(value.to_string()),
                "Size" => info.size = Some(value.to_string()),
                _ => {}
            }
        }
    }
    if let Some(info) = current {
        result.push(info);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIM_INFO: &str = r#"
Deployment Image Servicing and Management tool
Version: 10.0.22621.1

Details for image : D:\sources\install.wim

Index : 1
Name : Windows 11 Home
Description : Windows 11 Home
Size : 16,965,660,185 bytes

Index : 6
Name : Windows 11 Pro
Description : Windows 11 Pro
Size : 17,212,321,110 bytes

The operation completed successfully.
"#;

    #[test]
    fn parses_every_image_block() {
        let images = parse_wim_info(WIM_INFO);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].index, 1);
        assert_eq!(images[1].index, 6);
        assert_eq!(images[1].name, "Windows 11 Pro");
        assert_eq!(images[1].description.as_deref(), Some("Windows 11 Pro"));
        assert_eq!(images[0].size.as_deref(), Some("16,965,660,185 bytes"));
    }

    #[test]
    fn header_lines_with_colons_do_not_create_images() {
        assert!(parse_wim_info("Version: 10.0\nDetails for image : x.wim").is_empty());
    }
}
