//! Build-step interface
//!
//! The cross-compiler itself is external. This module defines the seam it is
//! called through and wraps it in [`GatedCompiler`], which refuses to compile
//! a source file whose workspace usage does not fit the device.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::device::DeviceConfig;
use crate::error::{Error, Result};
use crate::layout::MemoryLayout;
use crate::workspace::{check_workspace_with, WorkspaceAnalyzer};

/// Options passed to a compile step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Extra include directories (`-I`)
    pub include_paths: Vec<PathBuf>,
    /// Headers injected as `#include <...>` at the top of the source
    pub headers: Vec<String>,
    /// Additional compiler arguments, passed through untouched
    pub extra_args: Vec<String>,
}

impl CompileOptions {
    /// Include-path arguments in `-I <dir>` form
    pub fn include_args(&self) -> Vec<String> {
        self.include_paths
            .iter()
            .flat_map(|p| ["-I".to_string(), p.display().to_string()])
            .collect()
    }
}

/// Something that turns one source file into one object file
pub trait Compiler {
    /// Compile `source` into `output`
    fn compile(&self, output: &Path, source: &Path, options: &CompileOptions) -> Result<()>;
}

impl<C: Compiler + ?Sized> Compiler for &C {
    fn compile(&self, output: &Path, source: &Path, options: &CompileOptions) -> Result<()> {
        (**self).compile(output, source, options)
    }
}

impl<C: Compiler + ?Sized> Compiler for Box<C> {
    fn compile(&self, output: &Path, source: &Path, options: &CompileOptions) -> Result<()> {
        (**self).compile(output, source, options)
    }
}

/// Compiler wrapper that enforces the workspace budget
pub struct GatedCompiler<C> {
    inner: C,
    layout: MemoryLayout,
    analyzer: WorkspaceAnalyzer,
}

impl<C: Compiler> GatedCompiler<C> {
    /// Gate `inner` with the workspace section of `layout`
    pub fn new(inner: C, layout: MemoryLayout) -> Self {
        Self {
            inner,
            layout,
            analyzer: WorkspaceAnalyzer::new(),
        }
    }

    /// Use a custom analyzer
    pub fn with_analyzer(mut self, analyzer: WorkspaceAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Access the wrapped compiler
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Compiler> Compiler for GatedCompiler<C> {
    fn compile(&self, output: &Path, source: &Path, options: &CompileOptions) -> Result<()> {
        if options.headers.is_empty() != options.include_paths.is_empty() {
            return Err(Error::Config(
                "must specify both headers and include paths or neither".into(),
            ));
        }

        let mut contents = fs::read_to_string(source)?;
        if !options.headers.is_empty() {
            let injected: String = options
                .headers
                .iter()
                .map(|h| format!("#include <{}>\n", h))
                .collect();
            contents = injected + &contents;
        }

        // Nothing is written until the source is known to fit
        let usage = check_workspace_with(&self.analyzer, &contents, &self.layout)?;
        log::info!(
            "{}: peak workspace usage {} of {} bytes",
            source.display(),
            usage.peak,
            self.layout.workspace_size()
        );

        let source = if options.headers.is_empty() {
            source.to_path_buf()
        } else {
            let staged = staged_source_path(output, source);
            fs::write(&staged, &contents)?;
            log::debug!(
                "Injected {} header(s) into {}",
                options.headers.len(),
                staged.display()
            );
            staged
        };

        self.inner.compile(output, &source, options)
    }
}

/// Where a header-injected copy of `source` is written: next to `output`
fn staged_source_path(output: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source.c".into());
    output.with_file_name(format!("injected-{}", name))
}

/// Invokes `<prefix>gcc -c` for a device
#[derive(Debug, Clone)]
pub struct ToolchainCompiler {
    prefix: String,
    base_args: Vec<String>,
}

impl ToolchainCompiler {
    /// Toolchain for `device`
    pub fn for_device(device: &DeviceConfig) -> Self {
        let mut base_args = vec!["-std=c11".to_string(), "-ffunction-sections".to_string()];
        if device.thumb_mode {
            base_args.push("-mthumb".into());
        }
        Self {
            prefix: device.toolchain_prefix.clone(),
            base_args,
        }
    }

    /// Compiler executable name
    pub fn program(&self) -> String {
        format!("{}gcc", self.prefix)
    }

    /// Full argument list for one compile
    pub fn args(&self, output: &Path, source: &Path, options: &CompileOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(options.include_args());
        args.extend(options.extra_args.iter().cloned());
        args.push("-c".into());
        args.push("-o".into());
        args.push(output.display().to_string());
        args.push(source.display().to_string());
        args
    }
}

impl Compiler for ToolchainCompiler {
    fn compile(&self, output: &Path, source: &Path, options: &CompileOptions) -> Result<()> {
        let program = self.program();
        let args = self.args(output, source, options);
        log::debug!("Running {} {}", program, args.join(" "));

        let out = Command::new(&program).args(&args).output()?;
        if !out.status.success() {
            return Err(Error::Compile(format!(
                "{} exited with {}: {}",
                program,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}
