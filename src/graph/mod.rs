//! Device graph: tiles, channels, links and programs gathered into one
//! description.
//!
//! Graphs are built through an explicit [`DeviceBuilder`] context, either
//! call by call or by replaying a [`GraphDecls`] file with [`assemble`].
//! Every declaration is also written to a [`Listing`], one line each, so
//! diagnostics can point at the declaration that caused them.

pub mod builder;
pub mod verify;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::diagnostic::Diagnostic;
use crate::fifo::{ChannelDecl, ChannelManager};
use crate::link::{LinkDecl, LinkTable};
use crate::program::ProgramDecl;
use crate::span::Span;
use crate::tile::{TileCoord, TileDecl, TileRegistry, TileRole};
use crate::CompileOptions;

pub use builder::DeviceBuilder;
pub use verify::{verify, VerifiedGraph};

// ─── Declarations ──────────────────────────────────────────────────

/// Serializable form of a whole graph, as read from a graph file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDecls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub tiles: Vec<TileDecl>,
    #[serde(default)]
    pub channels: Vec<ChannelDecl>,
    #[serde(default)]
    pub links: Vec<LinkDecl>,
    #[serde(default)]
    pub programs: Vec<ProgramDecl>,
}

impl GraphDecls {
    pub fn from_json(text: &str) -> Result<Self, Diagnostic> {
        serde_json::from_str(text).map_err(|e| {
            Diagnostic::error(
                "invalid-graph-file",
                format!("cannot parse graph: {}", e),
                Span::dummy(),
            )
            .with_note(format!("at line {}, column {}", e.line(), e.column()))
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ─── Listing ───────────────────────────────────────────────────────

/// Text rendering of the declarations with the span of each one.
#[derive(Clone, Debug, Default)]
pub struct Listing {
    text: String,
    tiles: BTreeMap<TileCoord, Span>,
    channels: HashMap<String, Span>,
    links: HashMap<String, Span>,
    programs: BTreeMap<TileCoord, Span>,
}

impl Listing {
    /// The listing [`assemble`] produces for `decls`, whether or not it succeeds.
    pub fn of(decls: &GraphDecls) -> Self {
        let mut listing = Self::default();
        for tile in &decls.tiles {
            listing.push_tile(tile.coord, tile.role);
        }
        for channel in &decls.channels {
            listing.push_channel(channel);
        }
        for link in &decls.links {
            listing.push_link(link);
        }
        for program in &decls.programs {
            listing.push_program(program);
        }
        listing
    }

    fn push_line(&mut self, line: &str) -> Span {
        let start = self.text.len() as u32;
        self.text.push_str(line);
        let end = self.text.len() as u32;
        self.text.push('\n');
        Span::new(start, end)
    }

    pub(crate) fn push_tile(&mut self, coord: TileCoord, role: TileRole) -> Span {
        let span = self.push_line(&format!("{} {}", role, coord));
        self.tiles.entry(coord).or_insert(span);
        span
    }

    pub(crate) fn push_channel(&mut self, decl: &ChannelDecl) -> Span {
        let consumers: Vec<String> = decl.consumers.iter().map(|c| c.to_string()).collect();
        let span = self.push_line(&format!(
            "channel {}: {} -> [{}] depth {} of {}",
            decl.name,
            decl.producer,
            consumers.join(", "),
            decl.depth,
            decl.element
        ));
        // redeclarations point at their own line, lookups at the first
        self.channels.entry(decl.name.clone()).or_insert(span);
        span
    }

    pub(crate) fn push_link(&mut self, decl: &LinkDecl) -> Span {
        let span = self.push_line(&format!("link [{}] -> {}", decl.sources.join(", "), decl.sink));
        self.links.entry(decl.sink.clone()).or_insert(span);
        span
    }

    pub(crate) fn push_program(&mut self, decl: &ProgramDecl) -> Span {
        let span = self.push_line(&format!(
            "program {} {:?}: {} steps",
            decl.tile,
            decl.iterations,
            decl.steps.len()
        ));
        self.programs.entry(decl.tile).or_insert(span);
        span
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tile(&self, coord: TileCoord) -> Span {
        self.tiles.get(&coord).copied().unwrap_or_default()
    }

    pub fn channel(&self, name: &str) -> Span {
        self.channels.get(name).copied().unwrap_or_default()
    }

    pub fn link(&self, sink: &str) -> Span {
        self.links.get(sink).copied().unwrap_or_default()
    }

    pub fn program(&self, coord: TileCoord) -> Span {
        self.programs.get(&coord).copied().unwrap_or_default()
    }
}

// ─── Graph ─────────────────────────────────────────────────────────

/// An assembled, not yet verified, device graph.
#[derive(Clone, Debug)]
pub struct DeviceGraph {
    pub(crate) device: DeviceConfig,
    pub(crate) options: CompileOptions,
    pub(crate) tiles: TileRegistry,
    pub(crate) channels: ChannelManager,
    pub(crate) links: LinkTable,
    pub(crate) programs: BTreeMap<TileCoord, ProgramDecl>,
    pub(crate) listing: Listing,
}

impl DeviceGraph {
    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn tiles(&self) -> &TileRegistry {
        &self.tiles
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// Programs in tile-coordinate order.
    pub fn programs(&self) -> impl Iterator<Item = &ProgramDecl> {
        self.programs.values()
    }

    pub fn program(&self, tile: TileCoord) -> Option<&ProgramDecl> {
        self.programs.get(&tile)
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    /// Declarations that rebuild this graph.
    pub fn to_decls(&self) -> GraphDecls {
        GraphDecls {
            device: Some(self.device.name().to_string()),
            tiles: self
                .tiles
                .iter()
                .map(|(tile, role)| TileDecl {
                    coord: tile.coord(),
                    role,
                })
                .collect(),
            channels: self.channels.iter().cloned().collect(),
            links: self.links.iter().cloned().collect(),
            programs: self.programs.values().cloned().collect(),
        }
    }
}

/// Replay a declaration file through a fresh builder.
///
/// Every declaration is attempted, so the error list covers the whole file
/// rather than stopping at the first problem.
pub fn assemble(
    decls: &GraphDecls,
    device: &DeviceConfig,
    options: &CompileOptions,
) -> Result<DeviceGraph, Vec<Diagnostic>> {
    let mut builder = DeviceBuilder::new(device.clone(), options.clone());
    for tile in &decls.tiles {
        let _ = builder.declare_tile(tile.coord, tile.role);
    }
    for channel in &decls.channels {
        let _ = builder.insert_channel(channel.clone());
    }
    for link in &decls.links {
        let _ = builder.insert_link(link.clone());
    }
    for program in &decls.programs {
        let _ = builder.insert_program(program.clone());
    }
    builder.assemble()
}

#[cfg(test)]
mod tests;
