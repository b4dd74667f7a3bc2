//! TOML layout file parsing
//!
//! Parses layout files in TOML format:
//!
//! ```toml
//! [layout]
//! name = "stm32f746"
//!
//! [[section]]
//! name = "text"
//! start = 0x20000180
//! size = "20 KiB"
//!
//! [[section]]
//! name = "workspace"
//! size = 0x4000
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{LayoutError, MemoryLayout, SectionSpec};

/// TOML layout file structure
#[derive(Debug, serde::Deserialize)]
struct TomlLayoutFile {
    layout: Option<TomlLayoutMeta>,
    #[serde(default)]
    section: Vec<TomlSection>,
}

/// Layout metadata
#[derive(Debug, serde::Deserialize)]
struct TomlLayoutMeta {
    name: Option<String>,
}

/// Section definition in TOML
#[derive(Debug, serde::Deserialize)]
struct TomlSection {
    name: String,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    start: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_number")]
    size: Option<i64>,
}

/// Deserialize an integer that can be given as a number, hex string or size string
fn deserialize_opt_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Int(i64),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Int(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a size string like "16 KiB", "0x4000" or "4096"
pub fn parse_size(s: &str) -> Result<i64, String> {
    let s = s.trim();

    if let Ok(n) = s.parse::<i64>() {
        return Ok(n);
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex.trim(), 16).map_err(|e| format!("invalid hex: {}", e));
    }

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: i64 = num_str.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size out of range: {}", s))
}

/// Format a size as human-readable string
pub fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 && size % (1024 * 1024) == 0 {
        format!("{} MiB", size / (1024 * 1024))
    } else if size >= 1024 && size % 1024 == 0 {
        format!("{} KiB", size / 1024)
    } else {
        format!("{}", size)
    }
}

impl MemoryLayout {
    /// Load and validate a layout from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let content =
            fs::read_to_string(path).map_err(|e| LayoutError::IoError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a layout from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, LayoutError> {
        let file: TomlLayoutFile =
            toml::from_str(content).map_err(|e| LayoutError::ParseError(e.to_string()))?;

        if let Some(name) = file.layout.and_then(|m| m.name) {
            log::debug!("Parsing memory layout '{}'", name);
        }

        let mut config = BTreeMap::new();
        for section in file.section {
            let spec = SectionSpec {
                start: section.start,
                size: section.size,
            };
            if config.insert(section.name.clone(), spec).is_some() {
                return Err(LayoutError::ParseError(format!(
                    "section `{}` listed twice",
                    section.name
                )));
            }
        }

        Self::validate(&config)
    }

    /// Convert layout to TOML string
    pub fn to_toml_string(&self, name: Option<&str>) -> String {
        let mut output = String::new();

        if let Some(name) = name {
            output.push_str("[layout]\n");
            output.push_str(&format!("name = \"{}\"\n\n", name));
        }

        for section in self.sections() {
            output.push_str("[[section]]\n");
            output.push_str(&format!("name = \"{}\"\n", section.name));
            if let Some(start) = section.start {
                output.push_str(&format!("start = 0x{:08X}\n", start));
            }
            output.push_str(&format!("size = \"{}\"\n", format_size(section.size)));
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SectionName;

    const LAYOUT: &str = r#"
[layout]
name = "test board"

[[section]]
name = "text"
start = 0x20000000
size = "16 KiB"

[[section]]
name = "rodata"
size = 1024

[[section]]
name = "data"
size = "0x100"

[[section]]
name = "bss"
size = 256

[[section]]
name = "args"
size = 512

[[section]]
name = "heap"
size = "1 KiB"

[[section]]
name = "workspace"
start = "0x20010000"
size = "64 KiB"

[[section]]
name = "stack"
size = 2048
"#;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("0x1000").unwrap(), 4096);
        assert_eq!(parse_size("4 KiB").unwrap(), 4096);
        assert_eq!(parse_size("4KiB").unwrap(), 4096);
        assert_eq!(parse_size("2 MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("12b").unwrap(), 12);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let layout = MemoryLayout::from_toml_str(LAYOUT).unwrap();
        assert_eq!(layout.section_size("text").unwrap(), 16 * 1024);
        assert_eq!(layout.section_size("data").unwrap(), 0x100);
        assert_eq!(layout.workspace_size(), 64 * 1024);
        assert_eq!(
            layout.section(SectionName::Workspace).start,
            Some(0x2001_0000)
        );
        assert_eq!(layout.section_start("rodata").unwrap(), None);
    }

    #[test]
    fn test_toml_missing_section() {
        let trimmed = LAYOUT.replace("name = \"stack\"", "name = \"heap\"");
        assert!(matches!(
            MemoryLayout::from_toml_str(&trimmed),
            Err(LayoutError::ParseError(_))
        ));

        let without_stack: String = LAYOUT
            .split("[[section]]")
            .filter(|chunk| !chunk.contains("\"stack\""))
            .collect::<Vec<_>>()
            .join("[[section]]");
        assert_eq!(
            MemoryLayout::from_toml_str(&without_stack),
            Err(LayoutError::MissingSection(SectionName::Stack))
        );
    }

    #[test]
    fn test_toml_output_reparses() {
        let layout = MemoryLayout::from_toml_str(LAYOUT).unwrap();
        let text = layout.to_toml_string(Some("again"));
        assert!(text.contains("size = \"64 KiB\""));
        assert_eq!(MemoryLayout::from_toml_str(&text).unwrap(), layout);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        fs::write(&path, LAYOUT).unwrap();
        let layout = MemoryLayout::from_toml_file(&path).unwrap();
        assert_eq!(layout.section_size("stack").unwrap(), 2048);
        assert!(matches!(
            MemoryLayout::from_toml_file(dir.path().join("missing.toml")),
            Err(LayoutError::IoError(_))
        ));
    }
}
