pub mod build;
pub mod check;
pub mod demo;
pub mod hash;
pub mod simulate;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Args;

use aiemesh::device::DeviceConfig;
use aiemesh::diagnostic::{diagnostics_to_json, render_diagnostics, Diagnostic};
use aiemesh::graph::{GraphDecls, Listing, VerifiedGraph};
use aiemesh::span::Span;
use aiemesh::CompileOptions;

/// Arguments shared by every command that reads a graph file.
#[derive(Args)]
pub struct GraphArgs {
    /// Graph description (.json)
    pub input: PathBuf,
    /// Target device; overrides the device named in the file
    #[arg(long)]
    pub device: Option<String>,
    /// Iteration bound for steady-state programs
    #[arg(long)]
    pub steady_state: Option<u32>,
    /// Print diagnostics as JSON on stderr instead of rendering them
    #[arg(long)]
    pub json: bool,
}

/// A graph file read from disk, with the device it targets.
pub struct LoadedGraph {
    pub decls: GraphDecls,
    pub device: DeviceConfig,
    pub options: CompileOptions,
}

/// Read and parse a graph file and resolve its device. The `--device`
/// flag wins over the file; with neither, `npu1_1col` is used.
pub fn load_graph(
    input: &Path,
    device: Option<&str>,
    steady_state: Option<u32>,
) -> Result<LoadedGraph, Diagnostic> {
    let text = std::fs::read_to_string(input).map_err(|e| {
        Diagnostic::error(
            "io",
            format!("cannot read '{}': {}", input.display(), e),
            Span::dummy(),
        )
    })?;
    let decls = GraphDecls::from_json(&text)?;
    let name = device
        .map(str::to_string)
        .or_else(|| decls.device.clone())
        .unwrap_or_else(|| "npu1_1col".to_string());
    let device = DeviceConfig::resolve(&name)?;
    let mut options = CompileOptions::default();
    if let Some(bound) = steady_state {
        options.steady_state_iterations = bound;
    }
    Ok(LoadedGraph {
        decls,
        device,
        options,
    })
}

/// Load a graph file, or report why not and exit.
pub fn load_or_exit(args: &GraphArgs) -> LoadedGraph {
    match load_graph(&args.input, args.device.as_deref(), args.steady_state) {
        Ok(loaded) => loaded,
        Err(diag) => {
            eprintln!("error: {}", diag.message);
            for note in &diag.notes {
                eprintln!("  note: {}", note);
            }
            process::exit(1);
        }
    }
}

/// Report diagnostics against the graph's declaration listing. Stdout is
/// left to the command's own output, so JSON goes to `out` as well.
pub fn report(
    diagnostics: &[Diagnostic],
    args: &GraphArgs,
    decls: &GraphDecls,
    out: &mut dyn Write,
) {
    if args.json {
        if let Err(e) = writeln!(out, "{}", diagnostics_to_json(diagnostics)) {
            tracing::warn!(error = %e, "cannot write diagnostics");
        }
        return;
    }
    let listing = Listing::of(decls);
    render_diagnostics(
        diagnostics,
        &args.input.display().to_string(),
        listing.text(),
    );
}

/// Assemble and verify, reporting warnings or errors to `out`.
pub fn check_graph(
    args: &GraphArgs,
    loaded: &LoadedGraph,
    out: &mut dyn Write,
) -> Option<VerifiedGraph> {
    match aiemesh::check(&loaded.decls, &loaded.device, &loaded.options) {
        Ok(verified) => {
            if !verified.warnings().is_empty() {
                report(verified.warnings(), args, &loaded.decls, out);
            }
            Some(verified)
        }
        Err(diagnostics) => {
            report(&diagnostics, args, &loaded.decls, out);
            None
        }
    }
}

/// Assemble and verify, or report every diagnostic and exit.
pub fn check_or_exit(args: &GraphArgs, loaded: &LoadedGraph) -> VerifiedGraph {
    match check_graph(args, loaded, &mut io::stderr()) {
        Some(verified) => verified,
        None => process::exit(1),
    }
}
