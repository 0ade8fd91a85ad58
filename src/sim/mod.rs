//! Concurrent execution of a verified graph.
//!
//! Every compute program, every link source, and every host endpoint of a
//! shim tile runs as its own tokio task. Tasks meet only at channels: an
//! acquire suspends until the opposite side releases, a release never
//! waits. There is no global schedule, so across the sources of a join the
//! order of sink grants is whatever the runtime produces; the report
//! records it.

mod runtime;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::MeshError;
use crate::fifo::{Grant, Port, PortHandle, SlotRange};
use crate::graph::VerifiedGraph;
use crate::link::JoinState;
use crate::program::{Operand, ProgramDecl, Step};
use crate::tile::{TileCoord, TileRole};

use runtime::{ChannelRuntime, Side};

// ─── Configuration ─────────────────────────────────────────────────

/// What an acquire does when it cannot be served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallPolicy {
    /// Wait indefinitely. A deadlocked graph never finishes.
    Block,
    /// Fail with [`MeshError::Stalled`] after waiting this long.
    FailAfter(Duration),
}

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub stall: StallPolicy,
    /// Programs declaring more iterations than this are refused.
    pub max_iterations: u64,
    /// Host data for channels produced by shim tiles, flattened.
    pub inputs: BTreeMap<String, Vec<i64>>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            stall: StallPolicy::FailAfter(Duration::from_secs(2)),
            max_iterations: 1 << 20,
            inputs: BTreeMap::new(),
        }
    }
}

// ─── Report ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TileReads {
    pub tile: TileCoord,
    pub values: Vec<i64>,
}

/// One sink segment handed to a join source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GrantRecord {
    pub sink: String,
    pub source: String,
    pub seq: u64,
    pub offset: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimReport {
    /// Values drained by the host from shim-consumed channels, in order.
    pub outputs: BTreeMap<String, Vec<i64>>,
    /// Values observed by element reads, per tile.
    pub reads: Vec<TileReads>,
    /// Join grants in the order they happened.
    pub grants: Vec<GrantRecord>,
}

enum TaskOutput {
    Reads(TileCoord, Vec<i64>),
    Drained(String, Vec<i64>),
    Done,
}

type Channels = Arc<HashMap<String, Arc<ChannelRuntime>>>;

// ─── Entry points ──────────────────────────────────────────────────

/// Run the graph to completion on the current tokio runtime.
pub async fn simulate(graph: &VerifiedGraph, config: &SimConfig) -> Result<SimReport, MeshError> {
    check_inputs(graph, config)?;
    for program in graph.programs() {
        let iterations = program.iterations.resolve(graph.options());
        if iterations > config.max_iterations {
            return Err(MeshError::IterationLimit {
                coord: program.tile,
                iterations,
                limit: config.max_iterations,
            });
        }
    }

    let mut map = HashMap::new();
    for decl in graph.channels().iter() {
        let join = graph.links().link_of_sink(&decl.name).map(|link| {
            let lens = link
                .sources
                .iter()
                .filter_map(|s| graph.channels().get(s))
                .map(|s| s.element.len())
                .collect();
            JoinState::new(lens)
        });
        map.insert(
            decl.name.clone(),
            Arc::new(ChannelRuntime::new(decl.clone(), join)),
        );
    }
    let channels: Channels = Arc::new(map);
    let policy = config.stall;
    let mut tasks: JoinSet<Result<TaskOutput, MeshError>> = JoinSet::new();

    for program in graph.programs() {
        let program = program.clone();
        let iterations = program.iterations.resolve(graph.options());
        let channels = Arc::clone(&channels);
        tasks.spawn(async move { run_program(program, iterations, channels, policy).await });
    }

    for link in graph.links().iter() {
        let Some(sink) = channels.get(&link.sink) else {
            continue;
        };
        for (index, name) in link.sources.iter().enumerate() {
            let Some(source) = channels.get(name) else {
                continue;
            };
            let (source, sink) = (Arc::clone(source), Arc::clone(sink));
            tasks.spawn(async move { run_forwarder(source, sink, index, policy).await });
        }
    }

    for decl in graph.channels().iter() {
        let Some(channel) = channels.get(&decl.name) else {
            continue;
        };
        if is_shim(graph, decl.producer) && !graph.links().is_sink(&decl.name) {
            let values = config.inputs.get(&decl.name).cloned().unwrap_or_default();
            let channel = Arc::clone(channel);
            tasks.spawn(async move { run_feeder(channel, values, policy).await });
        }
        if graph.links().is_source(&decl.name) {
            continue;
        }
        for (index, &consumer) in decl.consumers.iter().enumerate() {
            if is_shim(graph, consumer) {
                let channel = Arc::clone(channel);
                tasks.spawn(async move { run_drain(channel, index, policy).await });
            }
        }
    }

    tracing::info!(tasks = tasks.len(), "simulation started");
    let mut report = SimReport::default();
    let mut reads = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let output = match joined {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                tracing::warn!(code = err.code(), "simulation failed: {}", err);
                tasks.abort_all();
                return Err(err);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(MeshError::Runtime(e.to_string()));
            }
        };
        match output {
            TaskOutput::Reads(tile, values) => {
                reads.insert(tile, values);
            }
            TaskOutput::Drained(channel, values) => {
                // broadcast copies to several shims are identical; keep one
                report.outputs.entry(channel).or_insert(values);
            }
            TaskOutput::Done => {}
        }
    }
    report.reads = reads
        .into_iter()
        .map(|(tile, values)| TileReads { tile, values })
        .collect();

    for link in graph.links().iter() {
        let Some(sink) = channels.get(&link.sink) else {
            continue;
        };
        let cell = sink.lock().await;
        if let Some(join) = &cell.join {
            report.grants.extend(join.grants().iter().map(|g| GrantRecord {
                sink: link.sink.clone(),
                source: link.sources[g.source].clone(),
                seq: g.seq,
                offset: g.offset,
            }));
        }
    }
    tracing::info!(
        outputs = report.outputs.len(),
        grants = report.grants.len(),
        "simulation finished"
    );
    Ok(report)
}

/// Run the graph on a fresh multi-threaded runtime.
pub fn simulate_blocking(graph: &VerifiedGraph, config: &SimConfig) -> Result<SimReport, MeshError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .map_err(|e| MeshError::Runtime(e.to_string()))?;
    runtime.block_on(simulate(graph, config))
}

fn is_shim(graph: &VerifiedGraph, coord: TileCoord) -> bool {
    graph
        .tiles()
        .resolve(coord, "simulation")
        .ok()
        .and_then(|t| graph.tiles().role(t))
        == Some(TileRole::Shim)
}

fn check_inputs(graph: &VerifiedGraph, config: &SimConfig) -> Result<(), MeshError> {
    for (name, values) in &config.inputs {
        let decl = graph.channels().resolve(name, "the simulation inputs")?;
        if !is_shim(graph, decl.producer) || graph.links().is_sink(name) {
            return Err(MeshError::PortDirection {
                coord: decl.producer,
                channel: name.clone(),
                port: Port::Produce,
                reason: "only channels produced by a shim tile take host input".to_string(),
            });
        }
        let len = decl.element.len();
        if values.len() % len != 0 {
            return Err(MeshError::InputShape {
                channel: name.clone(),
                len: values.len(),
                element_len: len,
            });
        }
        if let Some(&value) = values.iter().find(|v| !decl.element.scalar.fits(**v)) {
            return Err(MeshError::ValueOutOfRange {
                channel: name.clone(),
                value,
                scalar: decl.element.scalar.to_string(),
            });
        }
    }
    Ok(())
}

// ─── Tasks ─────────────────────────────────────────────────────────

fn lookup<'a>(channels: &'a Channels, port: &PortHandle, coord: TileCoord) -> Result<&'a Arc<ChannelRuntime>, MeshError> {
    channels.get(&port.channel).ok_or_else(|| MeshError::UnknownChannel {
        channel: port.channel.clone(),
        context: format!("the program on {}", coord),
    })
}

/// Seq of held object `object` on a port, oldest first.
fn held_seq(
    held: &HashMap<PortHandle, VecDeque<u64>>,
    port: &PortHandle,
    coord: TileCoord,
    object: u32,
    index: u32,
    len: usize,
) -> Result<u64, MeshError> {
    let slots = held.get(port);
    let count = slots.map_or(0, |s| s.len() as u32);
    match slots.and_then(|s| s.get(object as usize)) {
        Some(&seq) if (index as usize) < len => Ok(seq),
        _ => Err(MeshError::UnacquiredAccess {
            coord,
            channel: port.channel.clone(),
            port: port.port,
            object,
            index,
            held: count,
            len,
        }),
    }
}

async fn acquire(
    channel: &ChannelRuntime,
    side: Side,
    count: u32,
    policy: StallPolicy,
) -> Result<SlotRange, MeshError> {
    match side.port {
        Port::Produce => {
            channel
                .wait(side, policy, |cell| {
                    match cell.ring.try_acquire_produce(count) {
                        Ok(Grant::Granted(range)) => Ok(Some(range)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(channel.ring_error(side, e)),
                    }
                })
                .await
        }
        Port::Consume => {
            let consumer = channel.decl.consumer_index(side.coord).unwrap_or(0);
            channel
                .wait(side, policy, |cell| {
                    match cell.ring.try_acquire_consume(consumer, count) {
                        Ok(Grant::Granted(range)) => Ok(Some(range)),
                        Ok(Grant::WouldBlock) => Ok(None),
                        Ok(Grant::Drained) => Err(MeshError::ChannelDrained {
                            coord: side.coord,
                            channel: channel.decl.name.clone(),
                        }),
                        Err(e) => Err(channel.ring_error(side, e)),
                    }
                })
                .await
        }
    }
}

async fn release(channel: &ChannelRuntime, side: Side, count: u32) -> Result<(), MeshError> {
    let consumer = channel.decl.consumer_index(side.coord).unwrap_or(0);
    channel
        .update(|cell| match side.port {
            Port::Produce => cell.ring.release_produce(count),
            Port::Consume => cell.ring.release_consume(consumer, count),
        })
        .await
        .map_err(|e| channel.ring_error(side, e))
}

async fn run_program(
    program: ProgramDecl,
    iterations: u64,
    channels: Channels,
    policy: StallPolicy,
) -> Result<TaskOutput, MeshError> {
    let coord = program.tile;
    let mut held: HashMap<PortHandle, VecDeque<u64>> = HashMap::new();
    let mut reads = Vec::new();
    tracing::debug!(tile = %coord, iterations, "program started");

    for iteration in 0..iterations {
        for step in &program.steps {
            let port = step.port();
            let channel = lookup(&channels, port, coord)?;
            let side = Side {
                coord,
                port: port.port,
            };
            match step {
                Step::Acquire { count, .. } => {
                    let range = acquire(channel, side, *count, policy).await?;
                    tracing::trace!(tile = %coord, port = %port, first = range.first, count, "acquired");
                    held.entry(port.clone()).or_default().extend(range.seqs());
                }
                Step::Write {
                    object,
                    index,
                    value,
                    ..
                } => {
                    let len = channel.decl.element.len();
                    let seq = held_seq(&held, port, coord, *object, *index, len)?;
                    let value = match value {
                        Operand::Const(v) => *v,
                        Operand::Iteration => iteration as i64,
                    };
                    let scalar = channel.decl.element.scalar;
                    if !scalar.fits(value) {
                        return Err(MeshError::ValueOutOfRange {
                            channel: port.channel.clone(),
                            value,
                            scalar: scalar.to_string(),
                        });
                    }
                    channel.lock().await.ring.slot_mut(seq)[*index as usize] = value;
                }
                Step::Read { object, index, .. } => {
                    let len = channel.decl.element.len();
                    let seq = held_seq(&held, port, coord, *object, *index, len)?;
                    let value = channel.lock().await.ring.slot(seq)[*index as usize];
                    reads.push(value);
                }
                Step::Release { count, .. } => {
                    release(channel, side, *count).await?;
                    if let Some(slots) = held.get_mut(port) {
                        let n = (*count as usize).min(slots.len());
                        slots.drain(..n);
                    }
                    tracing::trace!(tile = %coord, port = %port, count, "released");
                }
            }
        }
    }

    for port in program.ports() {
        if port.port == Port::Produce {
            if let Some(channel) = channels.get(&port.channel) {
                channel.update(|cell| cell.ring.close()).await;
            }
        }
    }
    tracing::debug!(tile = %coord, reads = reads.len(), "program finished");
    Ok(TaskOutput::Reads(coord, reads))
}

/// Move objects of one join source into its segments of the sink.
async fn run_forwarder(
    source: Arc<ChannelRuntime>,
    sink: Arc<ChannelRuntime>,
    index: usize,
    policy: StallPolicy,
) -> Result<TaskOutput, MeshError> {
    let hub = sink.decl.producer;
    let take = Side {
        coord: hub,
        port: Port::Consume,
    };
    let give = Side {
        coord: hub,
        port: Port::Produce,
    };
    let missing_join = || MeshError::Runtime(format!("'{}' has no join state", sink.decl.name));

    loop {
        let next = source
            .wait(take, policy, |cell| match cell.ring.try_acquire_consume(0, 1) {
                Ok(Grant::Granted(range)) => Ok(Some(Some(range))),
                Ok(Grant::Drained) => Ok(Some(None)),
                Ok(Grant::WouldBlock) => Ok(None),
                Err(e) => Err(source.ring_error(take, e)),
            })
            .await?;
        let Some(range) = next else {
            break;
        };
        let data = source.lock().await.ring.slot(range.first).to_vec();

        let (seq, committed) = sink
            .wait(give, policy, |cell| {
                let join = cell.join.as_mut().ok_or_else(missing_join)?;
                let Some(seg) = join.try_acquire(&mut cell.ring, index) else {
                    return Ok(None);
                };
                cell.ring.slot_mut(seg.seq)[seg.offset..seg.offset + seg.len].copy_from_slice(&data);
                let committed = join
                    .release(&mut cell.ring, index)
                    .map_err(|e| sink.ring_error(give, e))?;
                Ok(Some((seg.seq, committed)))
            })
            .await?;
        tracing::trace!(sink = %sink.decl.name, source = %source.decl.name, seq, committed, "join segment");

        release(&source, take, 1).await?;
    }

    sink.update(|cell| {
        let join = cell.join.as_mut().ok_or_else(missing_join)?;
        if join.finish(index) {
            let pending = join.pending();
            if pending > 0 {
                return Err(MeshError::JoinIncomplete {
                    sink: sink.decl.name.clone(),
                    pending,
                });
            }
            cell.ring.close();
        }
        Ok(())
    })
    .await?;
    Ok(TaskOutput::Done)
}

/// Host side of a shim-produced channel.
async fn run_feeder(
    channel: Arc<ChannelRuntime>,
    values: Vec<i64>,
    policy: StallPolicy,
) -> Result<TaskOutput, MeshError> {
    let side = Side {
        coord: channel.decl.producer,
        port: Port::Produce,
    };
    let len = channel.decl.element.len();
    for chunk in values.chunks(len) {
        let range = acquire(&channel, side, 1, policy).await?;
        channel
            .update(|cell| {
                cell.ring.slot_mut(range.first).copy_from_slice(chunk);
                cell.ring.release_produce(1)
            })
            .await
            .map_err(|e| channel.ring_error(side, e))?;
    }
    channel.update(|cell| cell.ring.close()).await;
    Ok(TaskOutput::Done)
}

/// Host side of a shim-consumed channel.
async fn run_drain(
    channel: Arc<ChannelRuntime>,
    consumer: usize,
    policy: StallPolicy,
) -> Result<TaskOutput, MeshError> {
    let side = Side {
        coord: channel.decl.consumers[consumer],
        port: Port::Consume,
    };
    let mut values = Vec::new();
    loop {
        let next = channel
            .wait(side, policy, |cell| {
                match cell.ring.try_acquire_consume(consumer, 1) {
                    Ok(Grant::Granted(range)) => Ok(Some(Some(range))),
                    Ok(Grant::Drained) => Ok(Some(None)),
                    Ok(Grant::WouldBlock) => Ok(None),
                    Err(e) => Err(channel.ring_error(side, e)),
                }
            })
            .await?;
        let Some(range) = next else {
            break;
        };
        channel
            .update(|cell| {
                values.extend_from_slice(cell.ring.slot(range.first));
                cell.ring.release_consume(consumer, 1)
            })
            .await
            .map_err(|e| channel.ring_error(side, e))?;
    }
    Ok(TaskOutput::Drained(channel.decl.name.clone(), values))
}
