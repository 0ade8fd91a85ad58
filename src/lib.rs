pub mod demo;
pub mod device;
pub mod diagnostic;
pub mod emit;
pub mod error;
pub mod fifo;
pub mod graph;
pub mod link;
pub mod logging;
pub mod program;
pub mod sim;
pub mod span;
pub mod tile;
pub mod types;

use device::DeviceConfig;
use diagnostic::Diagnostic;
use graph::{assemble, verify, GraphDecls, VerifiedGraph};

/// Options that shape lowering rather than the graph itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Iteration bound a steady-state program is lowered to.
    pub steady_state_iterations: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            steady_state_iterations: i32::MAX as u32,
        }
    }
}

/// Assemble and verify a graph description. Warnings travel with the
/// verified graph; any error fails the whole check.
pub fn check(
    decls: &GraphDecls,
    device: &DeviceConfig,
    options: &CompileOptions,
) -> Result<VerifiedGraph, Vec<Diagnostic>> {
    let graph = assemble(decls, device, options)?;
    verify(graph)
}

/// Assemble, verify and emit a graph description.
pub fn compile(
    decls: &GraphDecls,
    device: &DeviceConfig,
    options: &CompileOptions,
) -> Result<String, Vec<Diagnostic>> {
    let verified = check(decls, device, options)?;
    Ok(emit::emit(&verified))
}
