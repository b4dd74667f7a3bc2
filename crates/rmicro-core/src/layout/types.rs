//! Memory layout types
//!
//! A device's address space is split into eight fixed sections. A
//! [`MemoryLayout`] can only be obtained through [`MemoryLayout::validate`],
//! so every layout in circulation has all of them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the eight fixed memory sections, in ascending address order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionName {
    /// Executable code
    Text,
    /// Read-only data
    Rodata,
    /// Initialized data
    Data,
    /// Zero-initialized data
    Bss,
    /// Function argument staging area
    Args,
    /// General heap
    Heap,
    /// Scratch memory for transient operator allocations
    Workspace,
    /// Call stack
    Stack,
}

impl SectionName {
    /// All sections, lowest start address first
    pub const ALL: [SectionName; 8] = [
        SectionName::Text,
        SectionName::Rodata,
        SectionName::Data,
        SectionName::Bss,
        SectionName::Args,
        SectionName::Heap,
        SectionName::Workspace,
        SectionName::Stack,
    ];

    /// Name as used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            SectionName::Text => "text",
            SectionName::Rodata => "rodata",
            SectionName::Data => "data",
            SectionName::Bss => "bss",
            SectionName::Args => "args",
            SectionName::Heap => "heap",
            SectionName::Workspace => "workspace",
            SectionName::Stack => "stack",
        }
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SectionName {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| LayoutError::UnknownSection(s.to_string()))
    }
}

/// Unvalidated section entry, as found in a device configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SectionSpec {
    /// Start address; absent means the linker assigns it
    #[serde(default)]
    pub start: Option<i64>,
    /// Size in bytes; required
    #[serde(default)]
    pub size: Option<i64>,
}

impl SectionSpec {
    /// Entry with a size and no fixed start
    pub fn sized(size: i64) -> Self {
        Self {
            start: None,
            size: Some(size),
        }
    }

    /// Entry with both start and size
    pub fn at(start: i64, size: i64) -> Self {
        Self {
            start: Some(start),
            size: Some(size),
        }
    }
}

/// A validated memory section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Which section this is
    pub name: SectionName,
    /// Start address, if fixed by the device configuration
    pub start: Option<u64>,
    /// Size in bytes
    pub size: u64,
}

impl Section {
    /// End address (exclusive), if the start is known
    pub fn end(&self) -> Option<u64> {
        self.start.map(|s| s + self.size)
    }

    /// Check if this section overlaps with another
    ///
    /// Sections without a start address, and empty sections, never overlap.
    pub fn overlaps(&self, other: &Section) -> bool {
        match (self.start, other.start) {
            (Some(a), Some(b)) if self.size > 0 && other.size > 0 => {
                a < b + other.size && b < a + self.size
            }
            _ => false,
        }
    }
}

/// A device's validated address-space partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Sections in [`SectionName::ALL`] order
    sections: Vec<Section>,
}

impl MemoryLayout {
    /// Validate a section-name to entry mapping
    ///
    /// All eight sections must be present with a non-negative size. Start
    /// addresses are optional, but when given they must be non-negative and
    /// the resulting ranges must not overlap.
    pub fn validate(config: &BTreeMap<String, SectionSpec>) -> Result<Self, LayoutError> {
        for key in config.keys() {
            key.parse::<SectionName>()?;
        }

        let mut sections = Vec::with_capacity(SectionName::ALL.len());
        for name in SectionName::ALL {
            let spec = config
                .get(name.as_str())
                .ok_or(LayoutError::MissingSection(name))?;

            let size = match spec.size {
                Some(size) if size >= 0 => size as u64,
                Some(size) => return Err(LayoutError::InvalidSize { section: name, size }),
                None => return Err(LayoutError::MissingSize(name)),
            };
            let start = match spec.start {
                Some(start) if start >= 0 => Some(start as u64),
                Some(start) => return Err(LayoutError::InvalidStart { section: name, start }),
                None => None,
            };
            if let Some(start) = start {
                if start.checked_add(size).is_none() {
                    return Err(LayoutError::AddressOverflow(name));
                }
            }

            sections.push(Section { name, start, size });
        }

        for (i, a) in sections.iter().enumerate() {
            for b in sections.iter().skip(i + 1) {
                if a.overlaps(b) {
                    return Err(LayoutError::OverlappingSections {
                        first: a.name,
                        second: b.name,
                    });
                }
            }
        }

        Ok(Self { sections })
    }

    /// Look up a section by name
    pub fn section(&self, name: SectionName) -> &Section {
        // Index matches SectionName::ALL order, established by validate()
        &self.sections[name as usize]
    }

    /// Size of the named section
    pub fn section_size(&self, name: &str) -> Result<u64, LayoutError> {
        Ok(self.find(name)?.size)
    }

    /// Start address of the named section, if fixed
    pub fn section_start(&self, name: &str) -> Result<Option<u64>, LayoutError> {
        Ok(self.find(name)?.start)
    }

    /// Capacity of the workspace section
    pub fn workspace_size(&self) -> u64 {
        self.section(SectionName::Workspace).size
    }

    /// Iterate over sections in address order
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Total size of all sections
    pub fn total_size(&self) -> u64 {
        self.sections.iter().map(|s| s.size).sum()
    }

    /// Convert back into an unvalidated mapping
    pub fn to_specs(&self) -> BTreeMap<String, SectionSpec> {
        self.sections
            .iter()
            .map(|s| {
                (
                    s.name.as_str().to_string(),
                    SectionSpec {
                        start: s.start.map(|v| v as i64),
                        size: Some(s.size as i64),
                    },
                )
            })
            .collect()
    }

    fn find(&self, name: &str) -> Result<&Section, LayoutError> {
        self.sections
            .iter()
            .find(|s| s.name.as_str() == name)
            .ok_or_else(|| LayoutError::SectionNotFound(name.to_string()))
    }
}

/// Errors that can occur when building or querying a memory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A required section is absent
    MissingSection(SectionName),
    /// A section has no size
    MissingSize(SectionName),
    /// A section has a negative size
    InvalidSize {
        /// Offending section
        section: SectionName,
        /// Size as given
        size: i64,
    },
    /// A section has a negative start address
    InvalidStart {
        /// Offending section
        section: SectionName,
        /// Start as given
        start: i64,
    },
    /// start + size does not fit the address space
    AddressOverflow(SectionName),
    /// Two sections with fixed starts overlap
    OverlappingSections {
        /// Lower section in canonical order
        first: SectionName,
        /// Higher section in canonical order
        second: SectionName,
    },
    /// Configuration names a section that does not exist
    UnknownSection(String),
    /// Lookup of a section not in the layout
    SectionNotFound(String),
    /// Failed to parse a layout file
    ParseError(String),
    /// I/O error
    IoError(String),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSection(name) => {
                write!(f, "not all sections have an assigned memory layout: `{}` is missing", name)
            }
            Self::MissingSize(name) => write!(f, "section `{}` has no size", name),
            Self::InvalidSize { section, size } => {
                write!(f, "section `{}` has negative size {}", section, size)
            }
            Self::InvalidStart { section, start } => {
                write!(f, "section `{}` has negative start address {}", section, start)
            }
            Self::AddressOverflow(name) => {
                write!(f, "section `{}` extends past the end of the address space", name)
            }
            Self::OverlappingSections { first, second } => {
                write!(f, "sections `{}` and `{}` overlap", first, second)
            }
            Self::UnknownSection(name) => write!(f, "unknown section `{}`", name),
            Self::SectionNotFound(name) => write!(f, "section `{}` not found", name),
            Self::ParseError(msg) => write!(f, "failed to parse layout: {}", msg),
            Self::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for LayoutError {}
