//! The fan-in join scenario on a single column.
//!
//! Three compute tiles each fill 8-element objects with ones and push them
//! through their own depth-2 channel into the memory tile. A link joins the
//! three channels into one depth-2 channel of 24-element objects that the
//! shim tile drains to the host.

use crate::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::error::MeshError;
use crate::graph::{DeviceBuilder, DeviceGraph};
use crate::program::{Iterations, Operand, ProgramBuilder};
use crate::tile::{TileCoord, TileRole};
use crate::types::{ElementType, ScalarType};
use crate::CompileOptions;

pub const SOURCES: u8 = 3;
pub const SOURCE_LEN: usize = 8;
pub const ITERATIONS: u32 = 6;
pub const DEPTH: u32 = 2;

/// Build the join graph for `device`. Not yet verified.
pub fn join_l2(device: DeviceConfig, options: CompileOptions) -> Result<DeviceGraph, Vec<Diagnostic>> {
    let mut builder = DeviceBuilder::new(device, options);
    // the builder keeps every rejection; the first one only stops declaring
    let _ = declare(&mut builder);
    builder.assemble()
}

fn declare(b: &mut DeviceBuilder) -> Result<(), MeshError> {
    let shim = b.declare_tile(TileCoord::new(0, 0), TileRole::Shim)?;
    let mem = b.declare_tile(TileCoord::new(0, 1), TileRole::Memory)?;

    let sink_len = SOURCE_LEN * usize::from(SOURCES);
    let out = b.create_channel(
        "out",
        mem,
        shim,
        DEPTH,
        ElementType::array(ScalarType::I32, sink_len),
    )?;

    let mut sources = Vec::new();
    let mut cores = Vec::new();
    for i in 0..SOURCES {
        let core = b.declare_tile(TileCoord::new(0, 2 + i), TileRole::Compute)?;
        let channel = b.create_channel(
            &format!("out{}", i),
            core,
            mem,
            DEPTH,
            ElementType::array(ScalarType::I32, SOURCE_LEN),
        )?;
        cores.push(core);
        sources.push(channel);
    }
    b.link(&sources, &out)?;

    for (core, channel) in cores.into_iter().zip(&sources) {
        let port = channel.produce();
        let body = ProgramBuilder::new()
            .acquire(&port, 1)
            .fill(&port, 0, SOURCE_LEN as u32, Operand::Const(1))
            .release(&port, 1);
        b.define_program(core, Iterations::Count(ITERATIONS), body)?;
    }
    Ok(())
}
