//! Textual intermediate form handed to the lowering backend.
//!
//! Output is MLIR-flavoured and deterministic: tiles in coordinate order,
//! channels and links in declaration order, cores in tile order. Only a
//! [`VerifiedGraph`] can be emitted.

use std::fmt::Write;

use crate::fifo::{ChannelDecl, Port};
use crate::graph::VerifiedGraph;
use crate::link::LinkDecl;
use crate::program::{Operand, ProgramDecl, Step};

const INDENT: &str = "  ";

/// Emit the whole module.
pub fn emit(graph: &VerifiedGraph) -> String {
    let mut out = String::new();
    out.push_str("module {\n");
    let _ = writeln!(out, "{}aie.device({}) {{", INDENT, graph.device().name());
    for (tile, _) in graph.tiles().iter() {
        let coord = tile.coord();
        let _ = writeln!(
            out,
            "{0}{0}%{1} = aie.tile({2}, {3})",
            INDENT,
            coord.symbol(),
            coord.col,
            coord.row
        );
    }
    for channel in graph.channels().iter() {
        let _ = writeln!(out, "{0}{0}{1}", INDENT, objectfifo(channel));
    }
    for link in graph.links().iter() {
        let _ = writeln!(out, "{0}{0}{1}", INDENT, objectfifo_link(graph, link));
    }
    for program in graph.programs() {
        for line in core(graph, program) {
            let _ = writeln!(out, "{0}{0}{1}", INDENT, line);
        }
    }
    let _ = writeln!(out, "{}}}", INDENT);
    out.push_str("}\n");
    out
}

fn memref(channel: &ChannelDecl) -> String {
    format!("memref<{}>", channel.element)
}

fn objectfifo(channel: &ChannelDecl) -> String {
    let consumers: Vec<String> = channel
        .consumers
        .iter()
        .map(|c| format!("%{}", c.symbol()))
        .collect();
    format!(
        "aie.objectfifo @{}(%{}, {{{}}}, {} : i32) : !aie.objectfifo<{}>",
        channel.name,
        channel.producer.symbol(),
        consumers.join(", "),
        channel.depth,
        memref(channel)
    )
}

fn objectfifo_link(graph: &VerifiedGraph, link: &LinkDecl) -> String {
    let sources: Vec<String> = link.sources.iter().map(|s| format!("@{}", s)).collect();
    let lens: Vec<String> = link
        .sources
        .iter()
        .filter_map(|s| graph.channels().get(s))
        .map(|c| c.element.len().to_string())
        .collect();
    format!(
        "aie.objectfifo.link [{}] -> [@{}] (join [{}])",
        sources.join(", "),
        link.sink,
        lens.join(", ")
    )
}

fn core(graph: &VerifiedGraph, program: &ProgramDecl) -> Vec<String> {
    let coord = program.tile;
    let iterations = program.iterations.resolve(graph.options());
    let mut lines = vec![
        format!(
            "%core_{}_{} = aie.core(%{}) {{",
            coord.col,
            coord.row,
            coord.symbol()
        ),
        format!("{}scf.for %iv = 0 to {} {{", INDENT, iterations),
    ];
    for step in &program.steps {
        let scalar = graph
            .channels()
            .get(&step.port().channel)
            .map(|c| c.element.scalar.to_string())
            .unwrap_or_default();
        lines.push(format!("{0}{0}{1}", INDENT, step_line(step, &scalar)));
    }
    lines.push(format!("{}}}", INDENT));
    lines.push(format!("{}aie.end", INDENT));
    lines.push("}".to_string());
    lines
}

fn step_line(step: &Step, scalar: &str) -> String {
    match step {
        Step::Acquire { port, count } => {
            format!("aie.objectfifo.acquire {}", port_ref(&port.channel, port.port, *count))
        }
        Step::Release { port, count } => {
            format!("aie.objectfifo.release {}", port_ref(&port.channel, port.port, *count))
        }
        Step::Write {
            port,
            object,
            index,
            value,
        } => {
            let value = match value {
                Operand::Const(v) => v.to_string(),
                Operand::Iteration => "%iv".to_string(),
            };
            format!(
                "aie.objectfifo.store {} @{}({})[{}, {}] : {}",
                value, port.channel, port.port, object, index, scalar
            )
        }
        Step::Read {
            port,
            object,
            index,
        } => format!(
            "aie.objectfifo.load @{}({})[{}, {}] : {}",
            port.channel, port.port, object, index, scalar
        ),
    }
}

fn port_ref(channel: &str, port: Port, count: u32) -> String {
    format!("@{}({}, {})", channel, port, count)
}

// ─── Fingerprints ──────────────────────────────────────────────────

/// Content hash of an emitted module.
pub fn module_fingerprint(text: &str) -> blake3::Hash {
    blake3::hash(text.as_bytes())
}

/// First 16 hex digits, enough to tell modules apart in listings.
pub fn short_hex(hash: &blake3::Hash) -> String {
    hash.to_hex()[..16].to_string()
}

/// Per-declaration hashes: each channel, link and core by its emitted text.
pub fn declaration_fingerprints(graph: &VerifiedGraph) -> Vec<(String, blake3::Hash)> {
    let mut out = Vec::new();
    for channel in graph.channels().iter() {
        out.push((
            format!("channel {}", channel.name),
            blake3::hash(objectfifo(channel).as_bytes()),
        ));
    }
    for link in graph.links().iter() {
        out.push((
            format!("link {}", link.sink),
            blake3::hash(objectfifo_link(graph, link).as_bytes()),
        ));
    }
    for program in graph.programs() {
        let mut hasher = blake3::Hasher::new();
        for line in core(graph, program) {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        out.push((format!("core {}", program.tile), hasher.finalize()));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}
