//! Workspace budget checking
//!
//! Generated operator code obtains scratch memory from the device's workspace
//! section through paired allocate/free calls. Before a library is built, its
//! source is scanned to find the largest amount of workspace live at once;
//! if that exceeds the workspace section the build is rejected.
//!
//! ```ignore
//! let usage = check_workspace(&source, &device.mem_layout)?;
//! log::info!("peak workspace usage: {} bytes", usage.peak);
//! ```
//!
//! The analysis assumes generated code allocates and frees by name, with
//! constant sizes, and never re-allocates a name that is still live.

mod analyzer;
mod scanner;

pub use analyzer::{compute_peak_usage, WorkspaceAnalyzer, WorkspaceLedger, WorkspaceUsage};
pub use scanner::{fold_constant, CallPattern};

use crate::error::{Error, Result};
use crate::layout::MemoryLayout;

/// Reject `usage` if it does not fit in `capacity` bytes
pub fn ensure_fits(usage: &WorkspaceUsage, capacity: u64) -> Result<()> {
    if usage.peak > capacity {
        return Err(Error::WorkspaceOverflow {
            peak: usage.peak,
            capacity,
        });
    }
    Ok(())
}

/// Analyze `source` and check it against the layout's workspace section
pub fn check_workspace(source: &str, layout: &MemoryLayout) -> Result<WorkspaceUsage> {
    check_workspace_with(&WorkspaceAnalyzer::new(), source, layout)
}

/// Like [`check_workspace`] with a specific analyzer
pub fn check_workspace_with(
    analyzer: &WorkspaceAnalyzer,
    source: &str,
    layout: &MemoryLayout,
) -> Result<WorkspaceUsage> {
    let usage = analyzer.analyze(source)?;
    let capacity = layout.workspace_size();
    ensure_fits(&usage, capacity)?;
    log::debug!(
        "workspace: peak {} of {} bytes ({} allocation sites)",
        usage.peak,
        capacity,
        usage.allocations
    );
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{SectionName, SectionSpec};
    use std::collections::BTreeMap;

    fn layout_with_workspace(size: i64) -> MemoryLayout {
        let config: BTreeMap<_, _> = SectionName::ALL
            .iter()
            .map(|n| {
                let size = if *n == SectionName::Workspace { size } else { 256 };
                (n.as_str().to_string(), SectionSpec::sized(size))
            })
            .collect();
        MemoryLayout::validate(&config).unwrap()
    }

    fn alloc_line(token: &str, size: u64) -> String {
        format!(
            "void* {} = (void*)TVMBackendAllocWorkspace(1, dev_id, (uint64_t){}, 2, 32);\n",
            token, size
        )
    }

    #[test]
    fn test_overflow_carries_both_numbers() {
        let src = alloc_line("a", 700) + &alloc_line("b", 500);
        let err = check_workspace(&src, &layout_with_workspace(1000)).unwrap_err();
        assert!(matches!(
            err,
            Error::WorkspaceOverflow {
                peak: 1200,
                capacity: 1000
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains("1200") && msg.contains("1000"));
    }

    #[test]
    fn test_exact_fit_is_accepted() {
        let src = alloc_line("a", 600) + &alloc_line("b", 400);
        let usage = check_workspace(&src, &layout_with_workspace(1000)).unwrap();
        assert_eq!(usage.peak, 1000);
    }

    #[test]
    fn test_ensure_fits() {
        let usage = WorkspaceUsage {
            peak: 10,
            allocations: 1,
            frees: 0,
            unfreed: Vec::new(),
        };
        assert!(ensure_fits(&usage, 10).is_ok());
        assert!(ensure_fits(&usage, 9).is_err());
    }
}
