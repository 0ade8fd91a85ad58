//! Whole-graph verification.
//!
//! Declarations were already checked one at a time while the graph was
//! built. The checks here need the complete graph: link cycles, program
//! ports against links declared later, per-tile resource budgets, and
//! liveness of every channel side. Object counts that can never balance
//! are errors; a side nobody drives is only a warning. A [`VerifiedGraph`] can only be obtained
//! through [`verify`], and only a verified graph can be emitted or run.

use std::collections::BTreeMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::diagnostic::{has_errors, Diagnostic};
use crate::error::MeshError;
use crate::fifo::{ChannelDecl, Port, PortHandle};
use crate::graph::DeviceGraph;
use crate::program::{check_program, ProgramContext};
use crate::span::Span;
use crate::tile::{TileCoord, TileRole};

/// A graph that passed verification, with any warnings raised on the way.
#[derive(Clone, Debug)]
pub struct VerifiedGraph {
    graph: DeviceGraph,
    warnings: Vec<Diagnostic>,
}

impl VerifiedGraph {
    pub fn graph(&self) -> &DeviceGraph {
        &self.graph
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}

impl std::ops::Deref for VerifiedGraph {
    type Target = DeviceGraph;

    fn deref(&self) -> &DeviceGraph {
        &self.graph
    }
}

/// Check the whole graph. On failure every violated invariant is reported.
pub fn verify(graph: DeviceGraph) -> Result<VerifiedGraph, Vec<Diagnostic>> {
    let mut diags = Vec::new();
    check_references(&graph, &mut diags);
    check_link_cycles(&graph, &mut diags);
    check_programs(&graph, &mut diags);
    check_resources(&graph, &mut diags);
    check_liveness(&graph, &mut diags);
    check_unused_tiles(&graph, &mut diags);

    if has_errors(&diags) {
        tracing::info!(
            device = graph.device.name(),
            errors = diags.iter().filter(|d| d.is_error()).count(),
            "verification failed"
        );
        return Err(diags);
    }
    tracing::info!(
        device = graph.device.name(),
        tiles = graph.tiles.len(),
        channels = graph.channels.len(),
        links = graph.links.len(),
        programs = graph.programs.len(),
        "graph verified"
    );
    Ok(VerifiedGraph {
        graph,
        warnings: diags,
    })
}

fn push(diags: &mut Vec<Diagnostic>, err: MeshError, span: Span) {
    diags.push(err.to_diagnostic(span));
}

/// Undriven channel sides only idle the channel; they are reported but do
/// not fail verification.
fn warn(diags: &mut Vec<Diagnostic>, err: MeshError, span: Span) {
    diags.push(Diagnostic::warning(err.code(), err.to_string(), span));
}

fn tile_role(graph: &DeviceGraph, coord: TileCoord) -> Option<TileRole> {
    graph
        .tiles
        .resolve(coord, "verification")
        .ok()
        .and_then(|t| graph.tiles.role(t))
}

// ─── References ────────────────────────────────────────────────────

fn check_references(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    for channel in graph.channels.iter() {
        let span = graph.listing.channel(&channel.name);
        let context = format!("channel '{}'", channel.name);
        let ends = std::iter::once(&channel.producer).chain(&channel.consumers);
        for coord in ends {
            if let Err(err) = graph.tiles.resolve(*coord, &context) {
                push(diags, err, span);
            }
        }
    }
    for link in graph.links.iter() {
        let span = graph.listing.link(&link.sink);
        let context = format!("the link into '{}'", link.sink);
        for name in link.sources.iter().chain(std::iter::once(&link.sink)) {
            if let Err(err) = graph.channels.resolve(name, &context) {
                push(diags, err, span);
            }
        }
    }
}

// ─── Link cycles ───────────────────────────────────────────────────

/// Channels are nodes, each link adds source -> sink edges. Any strongly
/// connected component with more than one channel is a cycle of links
/// feeding each other.
fn check_link_cycles(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    let mut g: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes = BTreeMap::new();
    for channel in graph.channels.iter() {
        nodes.insert(channel.name.as_str(), g.add_node(channel.name.as_str()));
    }
    for link in graph.links.iter() {
        let Some(&sink) = nodes.get(link.sink.as_str()) else {
            continue;
        };
        for source in &link.sources {
            if let Some(&src) = nodes.get(source.as_str()) {
                g.add_edge(src, sink, ());
            }
        }
    }
    for scc in tarjan_scc(&g) {
        let cyclic = scc.len() > 1 || scc.iter().any(|&n| g.contains_edge(n, n));
        if !cyclic {
            continue;
        }
        let mut names: Vec<&str> = scc.iter().map(|&n| g[n]).collect();
        names.sort_unstable();
        let first = names[0];
        let span = graph
            .links
            .link_of_sink(first)
            .map(|l| graph.listing.link(&l.sink))
            .unwrap_or_else(|| graph.listing.channel(first));
        diags.push(
            MeshError::LinkCycle {
                channel: first.to_string(),
            }
            .to_diagnostic(span)
            .with_note(format!("channels on the cycle: {}", names.join(", "))),
        );
    }
}

// ─── Programs ──────────────────────────────────────────────────────

fn check_programs(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    let cx = ProgramContext {
        tiles: &graph.tiles,
        channels: &graph.channels,
        links: &graph.links,
        options: &graph.options,
    };
    for program in graph.programs.values() {
        let span = graph.listing.program(program.tile);
        for err in check_program(program, &cx) {
            push(diags, err, span);
        }
    }
}

// ─── Resources ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
struct Usage {
    memory_bytes: u64,
    locks: u64,
    dma_in: u64,
    dma_out: u64,
}

/// Every buffered side of a channel costs `depth` elements of data memory
/// and a producer/consumer lock pair on its tile. Shim buffers live in host
/// memory. A link source delivers straight into the sink's buffer, so its
/// consumer side allocates nothing. Crossing tiles costs one outgoing DMA
/// channel on the producer and one incoming on each consumer.
fn resource_usage(graph: &DeviceGraph) -> BTreeMap<TileCoord, Usage> {
    let mut usage: BTreeMap<TileCoord, Usage> = BTreeMap::new();
    let role = |coord: TileCoord| tile_role(graph, coord);
    for channel in graph.channels.iter() {
        let buffer = u64::from(channel.depth) * channel.element.bytes();
        let is_source = graph.links.is_source(&channel.name);

        if role(channel.producer) != Some(TileRole::Shim) {
            let u = usage.entry(channel.producer).or_default();
            u.memory_bytes += buffer;
            u.locks += 2;
        }
        if channel.consumers.iter().any(|c| *c != channel.producer) {
            usage.entry(channel.producer).or_default().dma_out += 1;
        }
        for &consumer in &channel.consumers {
            if consumer == channel.producer {
                continue;
            }
            let u = usage.entry(consumer).or_default();
            u.dma_in += 1;
            if role(consumer) != Some(TileRole::Shim) && !is_source {
                u.memory_bytes += buffer;
                u.locks += 2;
            }
        }
    }
    usage
}

fn check_resources(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    for (coord, used) in resource_usage(graph) {
        let Some(role) = tile_role(graph, coord) else {
            continue;
        };
        let budget = graph.device.budget(role);
        let span = graph.listing.tile(coord);
        let limits = [
            ("data memory", used.memory_bytes, budget.memory_bytes),
            ("lock", used.locks, u64::from(budget.locks)),
            ("incoming DMA channel", used.dma_in, u64::from(budget.dma_channels)),
            ("outgoing DMA channel", used.dma_out, u64::from(budget.dma_channels)),
        ];
        for (resource, needed, available) in limits {
            if needed > available {
                push(
                    diags,
                    MeshError::ResourceExhausted {
                        coord,
                        resource,
                        needed,
                        available,
                    },
                    span,
                );
            }
        }
    }
}

// ─── Liveness ──────────────────────────────────────────────────────

/// Who drives one side of a channel, and how many objects it moves over
/// the whole run when that is statically known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Driver {
    Program(u64),
    Host,
    Link(Option<u64>),
    Nobody,
}

impl Driver {
    fn count(self) -> Option<u64> {
        match self {
            Driver::Program(n) => Some(n),
            Driver::Link(n) => n,
            Driver::Host | Driver::Nobody => None,
        }
    }
}

struct Totals {
    released: BTreeMap<(TileCoord, PortHandle), u64>,
}

impl Totals {
    fn new(graph: &DeviceGraph) -> Self {
        let mut released = BTreeMap::new();
        for program in graph.programs.values() {
            for (port, total) in program.released_totals(&graph.options) {
                released.insert((program.tile, port), total);
            }
        }
        Self { released }
    }

    fn program(&self, tile: TileCoord, channel: &str, port: Port) -> Option<u64> {
        self.released
            .get(&(tile, PortHandle::new(channel, port)))
            .copied()
    }
}

fn producer_driver(graph: &DeviceGraph, totals: &Totals, channel: &ChannelDecl) -> Driver {
    driver_through_links(graph, totals, channel, graph.channels.len())
}

/// `budget` bounds the walk up chained links; cycles are reported elsewhere.
fn driver_through_links(
    graph: &DeviceGraph,
    totals: &Totals,
    channel: &ChannelDecl,
    budget: usize,
) -> Driver {
    if let Some(link) = graph.links.link_of_sink(&channel.name) {
        if budget == 0 {
            return Driver::Link(None);
        }
        // a join completes one sink object per contribution of every source
        let counts: Vec<Option<u64>> = link
            .sources
            .iter()
            .filter_map(|s| graph.channels.get(s))
            .map(|s| driver_through_links(graph, totals, s, budget - 1).count())
            .collect();
        let known: Option<Vec<u64>> = counts.into_iter().collect();
        return Driver::Link(known.and_then(|k| k.into_iter().min()));
    }
    if let Some(n) = totals.program(channel.producer, &channel.name, Port::Produce) {
        return Driver::Program(n);
    }
    if tile_role(graph, channel.producer) == Some(TileRole::Shim) {
        return Driver::Host;
    }
    Driver::Nobody
}

fn consumer_driver(
    graph: &DeviceGraph,
    totals: &Totals,
    channel: &ChannelDecl,
    consumer: TileCoord,
) -> Driver {
    if graph.links.is_source(&channel.name) {
        return Driver::Link(None);
    }
    if let Some(n) = totals.program(consumer, &channel.name, Port::Consume) {
        return Driver::Program(n);
    }
    if tile_role(graph, consumer) == Some(TileRole::Shim) {
        return Driver::Host;
    }
    Driver::Nobody
}

fn check_liveness(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    let totals = Totals::new(graph);
    for channel in graph.channels.iter() {
        let span = graph.listing.channel(&channel.name);
        let stall = |reason: String| MeshError::Liveness {
            channel: channel.name.clone(),
            reason,
        };

        if let Some(link) = graph.links.link_of_sink(&channel.name) {
            let counts: Vec<(String, u64)> = link
                .sources
                .iter()
                .filter_map(|s| graph.channels.get(s))
                .filter_map(|s| {
                    producer_driver(graph, &totals, s)
                        .count()
                        .map(|n| (s.name.clone(), n))
                })
                .collect();
            let unequal = counts.windows(2).any(|w| w[0].1 != w[1].1);
            if unequal {
                let listed: Vec<String> =
                    counts.iter().map(|(s, n)| format!("{}: {}", s, n)).collect();
                diags.push(
                    stall(format!(
                        "its join sources produce unequal object counts ({}); the last sink objects never complete",
                        listed.join(", ")
                    ))
                    .to_diagnostic(graph.listing.link(&link.sink))
                    .with_help("every sink object takes exactly one contribution from each source".to_string()),
                );
            }
        }

        let produced = producer_driver(graph, &totals, channel);
        if produced == Driver::Nobody {
            warn(
                diags,
                stall(format!(
                    "nothing drives its Produce port: no program on {} acquires it, and it is not a link sink",
                    channel.producer
                )),
                span,
            );
        }

        for &consumer in &channel.consumers {
            let consumed = consumer_driver(graph, &totals, channel, consumer);
            if consumed == Driver::Nobody {
                warn(
                    diags,
                    stall(format!(
                        "nothing drives its Consume port on {}: no program there acquires it, and it is not a link source",
                        consumer
                    )),
                    span,
                );
                continue;
            }
            let (Some(p), Some(c)) = (produced.count(), consumed.count()) else {
                continue;
            };
            if c > p {
                push(
                    diags,
                    stall(format!(
                        "{} consumes {} objects but only {} are produced",
                        consumer, c, p
                    )),
                    span,
                );
            } else if p > c + u64::from(channel.depth) {
                push(
                    diags,
                    stall(format!(
                        "{} objects are produced but {} takes only {} and the depth is {}; the producer blocks forever",
                        p, consumer, c, channel.depth
                    )),
                    span,
                );
            }
        }
    }
}

// ─── Warnings ──────────────────────────────────────────────────────

fn check_unused_tiles(graph: &DeviceGraph, diags: &mut Vec<Diagnostic>) {
    for (tile, role) in graph.tiles.iter() {
        let coord = tile.coord();
        let used = graph.programs.contains_key(&coord)
            || graph
                .channels
                .iter()
                .any(|c| c.producer == coord || c.consumers.contains(&coord));
        if !used {
            diags.push(Diagnostic::warning(
                "unused-tile",
                format!("{} tile {} is declared but never used", role, coord),
                graph.listing.tile(coord),
            ));
        }
    }
}
