//! Explicit graph-construction context.
//!
//! Each call validates one declaration, returns a handle or the error, and
//! also records the error as a diagnostic. [`DeviceBuilder::assemble`]
//! refuses to produce a graph while any error is recorded, so callers may
//! ignore individual results and still get the full list at the end.

use std::collections::BTreeMap;

use crate::device::DeviceConfig;
use crate::diagnostic::{has_errors, Diagnostic};
use crate::error::MeshError;
use crate::fifo::{ChannelDecl, ChannelHandle, ChannelManager};
use crate::graph::{DeviceGraph, Listing};
use crate::link::{LinkDecl, LinkTable};
use crate::program::{check_program, Iterations, ProgramBuilder, ProgramContext, ProgramDecl};
use crate::span::Span;
use crate::tile::{TileCoord, TileHandle, TileRegistry, TileRole};
use crate::types::ElementType;
use crate::CompileOptions;

pub struct DeviceBuilder {
    device: DeviceConfig,
    options: CompileOptions,
    tiles: TileRegistry,
    channels: ChannelManager,
    links: LinkTable,
    programs: BTreeMap<TileCoord, ProgramDecl>,
    listing: Listing,
    diagnostics: Vec<Diagnostic>,
}

impl DeviceBuilder {
    pub fn new(device: DeviceConfig, options: CompileOptions) -> Self {
        Self {
            device,
            options,
            tiles: TileRegistry::new(),
            channels: ChannelManager::new(),
            links: LinkTable::new(),
            programs: BTreeMap::new(),
            listing: Listing::default(),
            diagnostics: Vec::new(),
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn declare_tile(&mut self, coord: TileCoord, role: TileRole) -> Result<TileHandle, MeshError> {
        let span = self.listing.push_tile(coord, role);
        let result = self.tiles.declare_tile(&self.device, coord, role);
        self.record(result, span)
    }

    pub fn create_channel(
        &mut self,
        name: &str,
        producer: TileHandle,
        consumer: TileHandle,
        depth: u32,
        element: ElementType,
    ) -> Result<ChannelHandle, MeshError> {
        self.insert_channel(ChannelDecl {
            name: name.to_string(),
            producer: producer.coord(),
            consumers: vec![consumer.coord()],
            depth,
            element,
        })
    }

    pub fn create_broadcast_channel(
        &mut self,
        name: &str,
        producer: TileHandle,
        consumers: &[TileHandle],
        depth: u32,
        element: ElementType,
    ) -> Result<ChannelHandle, MeshError> {
        self.insert_channel(ChannelDecl {
            name: name.to_string(),
            producer: producer.coord(),
            consumers: consumers.iter().map(TileHandle::coord).collect(),
            depth,
            element,
        })
    }

    pub fn insert_channel(&mut self, decl: ChannelDecl) -> Result<ChannelHandle, MeshError> {
        let span = self.listing.push_channel(&decl);
        let earlier = self.channels.get(&decl.name).cloned();
        match self.channels.insert(&self.tiles, &self.device, decl.clone()) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                let mut diag = err.to_diagnostic(span);
                if let Some(earlier) = earlier.filter(|_| err.code() == "duplicate-channel-name") {
                    diag = diag.with_note(redeclaration_note(&earlier, &decl));
                }
                self.diagnostics.push(diag);
                Err(err)
            }
        }
    }

    /// Join `sources` into `sink`.
    pub fn link(&mut self, sources: &[ChannelHandle], sink: &ChannelHandle) -> Result<(), MeshError> {
        self.insert_link(LinkDecl::new(sources, sink))
    }

    pub fn insert_link(&mut self, decl: LinkDecl) -> Result<(), MeshError> {
        let span = self.listing.push_link(&decl);
        let result = self.links.insert(&self.channels, decl);
        self.record(result, span)
    }

    /// Attach a program to a compute tile, checking its acquire/release
    /// protocol against the channels declared so far.
    pub fn define_program(
        &mut self,
        tile: TileHandle,
        iterations: Iterations,
        body: ProgramBuilder,
    ) -> Result<(), MeshError> {
        self.insert_program(body.build(tile, iterations))
    }

    pub fn insert_program(&mut self, decl: ProgramDecl) -> Result<(), MeshError> {
        let span = self.listing.push_program(&decl);
        if self.programs.contains_key(&decl.tile) {
            let err = MeshError::DuplicateProgram { coord: decl.tile };
            return self.record(Err(err), span);
        }
        let errors = check_program(
            &decl,
            &ProgramContext {
                tiles: &self.tiles,
                channels: &self.channels,
                links: &self.links,
                options: &self.options,
            },
        );
        if let Some(first) = errors.first().cloned() {
            for err in &errors {
                self.diagnostics.push(err.to_diagnostic(span));
            }
            return Err(first);
        }
        tracing::debug!(tile = %decl.tile, steps = decl.steps.len(), "defined program");
        self.programs.insert(decl.tile, decl);
        Ok(())
    }

    /// Declarations seen so far, one line each.
    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    /// Diagnostics recorded so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Finish construction. Fails with every recorded diagnostic if any
    /// declaration was rejected.
    pub fn assemble(self) -> Result<DeviceGraph, Vec<Diagnostic>> {
        if has_errors(&self.diagnostics) {
            return Err(self.diagnostics);
        }
        Ok(DeviceGraph {
            device: self.device,
            options: self.options,
            tiles: self.tiles,
            channels: self.channels,
            links: self.links,
            programs: self.programs,
            listing: self.listing,
        })
    }

    fn record<T>(&mut self, result: Result<T, MeshError>, span: Span) -> Result<T, MeshError> {
        if let Err(err) = &result {
            tracing::debug!(code = err.code(), "rejected declaration: {}", err);
            self.diagnostics.push(err.to_diagnostic(span));
        }
        result
    }
}

fn redeclaration_note(earlier: &ChannelDecl, again: &ChannelDecl) -> String {
    if earlier == again {
        return "the redeclaration is identical to the first one; drop one of them".to_string();
    }
    let consumers: Vec<String> = earlier.consumers.iter().map(|c| c.to_string()).collect();
    format!(
        "the first declaration connects {} -> [{}] with depth {} of {}",
        earlier.producer,
        consumers.join(", "),
        earlier.depth,
        earlier.element
    )
}
