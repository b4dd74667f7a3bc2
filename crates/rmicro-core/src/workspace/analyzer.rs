//! Peak workspace usage analysis
//!
//! Scans generated source once, top to bottom, keeping a ledger of live
//! workspace allocations. The peak is the largest sum of live allocation
//! sizes seen at any point of the scan.

use std::collections::BTreeMap;

use super::scanner::{
    fold_constant, match_line, unclosed_call, CallPattern, CommentStripper, LineEvent,
};
use crate::error::{Error, Result};

/// Live workspace allocations during one scan
///
/// Re-allocating a token that is still live replaces its recorded size
/// instead of adding a second entry.
#[derive(Debug, Default, Clone)]
pub struct WorkspaceLedger {
    live: BTreeMap<String, u64>,
    current: u64,
    peak: u64,
}

impl WorkspaceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation and update the peak
    pub fn allocate(&mut self, token: &str, size: u64) {
        if let Some(old) = self.live.insert(token.to_string(), size) {
            log::debug!(
                "workspace: `{}` re-allocated while live ({} -> {} bytes)",
                token,
                old,
                size
            );
            self.current -= old;
        }
        self.current += size;
        self.peak = self.peak.max(self.current);
    }

    /// Remove an allocation, returning its size if it was live
    pub fn free(&mut self, token: &str) -> Option<u64> {
        let size = self.live.remove(token)?;
        self.current -= size;
        Some(size)
    }

    /// Sum of all live allocations
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Largest `current()` observed so far
    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Allocations still live
    pub fn live(&self) -> impl Iterator<Item = (&str, u64)> {
        self.live.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Result of analyzing one source unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceUsage {
    /// Peak concurrent workspace usage in bytes (alignment not included)
    pub peak: u64,
    /// Number of allocation sites seen
    pub allocations: usize,
    /// Number of free sites seen
    pub frees: usize,
    /// Allocations never freed, in token order
    pub unfreed: Vec<(String, u64)>,
}

/// Static workspace usage analyzer
#[derive(Debug, Clone, Default)]
pub struct WorkspaceAnalyzer {
    pattern: CallPattern,
}

impl WorkspaceAnalyzer {
    /// Analyzer for the default allocator calls
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer for custom allocator call names
    pub fn with_pattern(pattern: CallPattern) -> Self {
        Self { pattern }
    }

    /// Compute the peak concurrent workspace usage of `source`
    pub fn compute_peak_usage(&self, source: &str) -> Result<u64> {
        Ok(self.analyze(source)?.peak)
    }

    /// Scan `source` and report usage details
    pub fn analyze(&self, source: &str) -> Result<WorkspaceUsage> {
        let mut ledger = WorkspaceLedger::new();
        let mut stripper = CommentStripper::new();
        let mut allocations = 0;
        let mut frees = 0;

        // A call wrapped over several lines, joined so far, and its first line
        let mut pending: Option<(usize, String)> = None;

        for (idx, raw_line) in source.lines().enumerate() {
            let stripped = stripper.strip(raw_line);
            let (line_no, code) = match pending.take() {
                Some((start, mut joined)) => {
                    joined.push(' ');
                    joined.push_str(&stripped);
                    (start, joined)
                }
                None => (idx + 1, stripped),
            };
            if unclosed_call(&code, &self.pattern).is_some() {
                pending = Some((line_no, code));
                continue;
            }
            let Some(event) = match_line(&code, &self.pattern) else {
                continue;
            };

            match event {
                LineEvent::Alloc { token, size_expr } => {
                    allocations += 1;
                    let token = match token {
                        Some(token) => token.to_string(),
                        None => {
                            // Cannot be freed by name, so it stays live to the end
                            log::warn!(
                                "workspace: line {}: allocation result is not bound to a name",
                                line_no
                            );
                            format!("<unbound:{}>", line_no)
                        }
                    };
                    let size = fold_constant(size_expr).ok_or_else(|| {
                        Error::NonConstantAllocation {
                            line: line_no,
                            token: token.clone(),
                            expr: size_expr.to_string(),
                        }
                    })?;
                    ledger.allocate(&token, size);
                    log::trace!(
                        "workspace: line {}: alloc {} = {} bytes (live {}, peak {})",
                        line_no,
                        token,
                        size,
                        ledger.current(),
                        ledger.peak()
                    );
                }
                LineEvent::Free { token } => {
                    frees += 1;
                    if ledger.free(token).is_none() {
                        return Err(Error::MalformedAllocationTrace {
                            line: line_no,
                            token: token.to_string(),
                        });
                    }
                    log::trace!(
                        "workspace: line {}: free {} (live {})",
                        line_no,
                        token,
                        ledger.current()
                    );
                }
            }
        }

        if let Some((line, code)) = pending {
            let call = unclosed_call(&code, &self.pattern).unwrap_or_default();
            return Err(Error::UnterminatedAllocationCall {
                line,
                call: call.to_string(),
            });
        }

        let unfreed: Vec<_> = ledger.live().map(|(k, v)| (k.to_string(), v)).collect();
        if !unfreed.is_empty() {
            log::debug!("workspace: {} allocation(s) never freed", unfreed.len());
        }

        Ok(WorkspaceUsage {
            peak: ledger.peak(),
            allocations,
            frees,
            unfreed,
        })
    }
}

/// Compute peak workspace usage with the default allocator calls
pub fn compute_peak_usage(source: &str) -> Result<u64> {
    WorkspaceAnalyzer::new().compute_peak_usage(source)
}
