//! Per-tile programs: bounded, repeated acquire / access / release sequences.
//!
//! A program never loops forever. A steady-state program is declared with
//! [`Iterations::Steady`] and lowered to the explicit bound configured in
//! [`crate::CompileOptions`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::fifo::{ChannelManager, Port, PortHandle};
use crate::link::LinkTable;
use crate::tile::{TileCoord, TileHandle, TileRegistry, TileRole};
use crate::CompileOptions;

/// Value stored by an element write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    Const(i64),
    /// The zero-based iteration index of the enclosing repeat loop.
    Iteration,
}

/// One program step. `object` indexes the objects currently held on the
/// port, oldest first; `index` is the scalar position inside that object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    Acquire {
        port: PortHandle,
        count: u32,
    },
    Write {
        port: PortHandle,
        object: u32,
        index: u32,
        value: Operand,
    },
    Read {
        port: PortHandle,
        object: u32,
        index: u32,
    },
    Release {
        port: PortHandle,
        count: u32,
    },
}

impl Step {
    pub fn port(&self) -> &PortHandle {
        match self {
            Step::Acquire { port, .. }
            | Step::Write { port, .. }
            | Step::Read { port, .. }
            | Step::Release { port, .. } => port,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Iterations {
    Count(u32),
    /// Runs "forever"; lowered to `CompileOptions::steady_state_iterations`.
    Steady,
}

impl Iterations {
    pub fn resolve(self, options: &CompileOptions) -> u64 {
        match self {
            Iterations::Count(n) => u64::from(n),
            Iterations::Steady => u64::from(options.steady_state_iterations),
        }
    }
}

/// Declaration record for one tile program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDecl {
    pub tile: TileCoord,
    pub iterations: Iterations,
    pub steps: Vec<Step>,
}

impl ProgramDecl {
    /// Ports this program touches, in first-use order.
    pub fn ports(&self) -> Vec<&PortHandle> {
        let mut seen: Vec<&PortHandle> = Vec::new();
        for step in &self.steps {
            let port = step.port();
            if !seen.contains(&port) {
                seen.push(port);
            }
        }
        seen
    }

    /// Objects released per port over the whole run.
    pub fn released_totals(&self, options: &CompileOptions) -> BTreeMap<PortHandle, u64> {
        let iterations = self.iterations.resolve(options);
        let mut totals = BTreeMap::new();
        for step in &self.steps {
            if let Step::Release { port, count } = step {
                *totals.entry(port.clone()).or_insert(0) += u64::from(*count) * iterations;
            }
        }
        totals
    }
}

/// Fluent construction of a step list.
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    steps: Vec<Step>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(mut self, port: &PortHandle, count: u32) -> Self {
        self.steps.push(Step::Acquire {
            port: port.clone(),
            count,
        });
        self
    }

    pub fn write(mut self, port: &PortHandle, object: u32, index: u32, value: Operand) -> Self {
        self.steps.push(Step::Write {
            port: port.clone(),
            object,
            index,
            value,
        });
        self
    }

    /// Write `value` to indices `0..len` of one held object.
    pub fn fill(mut self, port: &PortHandle, object: u32, len: u32, value: Operand) -> Self {
        for index in 0..len {
            self = self.write(port, object, index, value);
        }
        self
    }

    pub fn read(mut self, port: &PortHandle, object: u32, index: u32) -> Self {
        self.steps.push(Step::Read {
            port: port.clone(),
            object,
            index,
        });
        self
    }

    pub fn release(mut self, port: &PortHandle, count: u32) -> Self {
        self.steps.push(Step::Release {
            port: port.clone(),
            count,
        });
        self
    }

    pub fn build(self, tile: TileHandle, iterations: Iterations) -> ProgramDecl {
        self.build_at(tile.coord(), iterations)
    }

    /// Build for a coordinate that has not been resolved to a handle yet.
    pub fn build_at(self, tile: TileCoord, iterations: Iterations) -> ProgramDecl {
        ProgramDecl {
            tile,
            iterations,
            steps: self.steps,
        }
    }
}

// ─── Static protocol check ─────────────────────────────────────────

/// Everything a program is checked against.
pub struct ProgramContext<'a> {
    pub tiles: &'a TileRegistry,
    pub channels: &'a ChannelManager,
    pub links: &'a LinkTable,
    pub options: &'a CompileOptions,
}

/// Check one program body, collecting every violation.
///
/// Walks the steps once with a symbolic held count per port. Because the
/// body must leave every port balanced, one iteration stands for all.
pub fn check_program(program: &ProgramDecl, cx: &ProgramContext<'_>) -> Vec<MeshError> {
    let mut errors = Vec::new();
    let coord = program.tile;
    let tile = match cx.tiles.resolve(coord, "a program") {
        Ok(t) => t,
        Err(e) => return vec![e],
    };
    match cx.tiles.role(tile) {
        Some(TileRole::Compute) => {}
        Some(role) => return vec![MeshError::NoCore { coord, role }],
        None => {}
    }

    let iterations = program.iterations.resolve(cx.options);
    let mut held: BTreeMap<&PortHandle, u32> = BTreeMap::new();
    let mut bad_ports: Vec<&PortHandle> = Vec::new();

    for port in program.ports() {
        if let Some(err) = check_port(coord, port, cx) {
            errors.push(err);
            bad_ports.push(port);
        }
    }

    for step in &program.steps {
        let port = step.port();
        if bad_ports.contains(&port) {
            continue;
        }
        let Some(channel) = cx.channels.get(&port.channel) else {
            continue;
        };
        let depth = channel.depth;
        let current = held.get(port).copied().unwrap_or(0);
        match step {
            Step::Acquire { count, .. } => {
                // held never exceeds depth, so the subtraction cannot wrap
                if *count > depth - current {
                    errors.push(MeshError::CapacityExceeded {
                        coord,
                        channel: port.channel.clone(),
                        port: port.port,
                        requested: *count,
                        held: current,
                        depth,
                    });
                } else {
                    held.insert(port, current + count);
                }
            }
            Step::Write {
                object,
                index,
                value,
                ..
            } => {
                let len = channel.element.len();
                if let Some(err) = check_access(coord, port, *object, *index, current, len) {
                    errors.push(err);
                }
                let stored = match value {
                    Operand::Const(v) => *v,
                    Operand::Iteration => iterations.saturating_sub(1).min(i64::MAX as u64) as i64,
                };
                if !channel.element.scalar.fits(stored) {
                    errors.push(MeshError::ValueOutOfRange {
                        channel: port.channel.clone(),
                        value: stored,
                        scalar: channel.element.scalar.to_string(),
                    });
                }
            }
            Step::Read { object, index, .. } => {
                let len = channel.element.len();
                if let Some(err) = check_access(coord, port, *object, *index, current, len) {
                    errors.push(err);
                }
            }
            Step::Release { count, .. } => {
                if *count > current {
                    errors.push(MeshError::ReleaseMismatch {
                        coord,
                        channel: port.channel.clone(),
                        port: port.port,
                        requested: *count,
                        held: current,
                    });
                } else {
                    held.insert(port, current - count);
                }
            }
        }
    }

    for (port, count) in held {
        if count > 0 {
            errors.push(MeshError::UnreleasedAtIterationEnd {
                coord,
                channel: port.channel.clone(),
                port: port.port,
                held: count,
            });
        }
    }
    errors
}

/// The tile must be the matching endpoint, and link-owned sides are off limits.
fn check_port(coord: TileCoord, port: &PortHandle, cx: &ProgramContext<'_>) -> Option<MeshError> {
    let context = format!("the program on {}", coord);
    let channel = match cx.channels.resolve(&port.channel, &context) {
        Ok(c) => c,
        Err(e) => return Some(e),
    };
    let reason = if !channel.is_endpoint(coord, port.port) {
        Some(match port.port {
            Port::Produce => format!("the channel is produced by {}", channel.producer),
            Port::Consume => "the tile is not one of its consumers".to_string(),
        })
    } else if port.port == Port::Produce && cx.links.is_sink(&port.channel) {
        Some("the channel is produced by its link".to_string())
    } else if port.port == Port::Consume && cx.links.is_source(&port.channel) {
        Some("the channel is consumed by its link".to_string())
    } else {
        None
    };
    reason.map(|reason| MeshError::PortDirection {
        coord,
        channel: port.channel.clone(),
        port: port.port,
        reason,
    })
}

fn check_access(
    coord: TileCoord,
    port: &PortHandle,
    object: u32,
    index: u32,
    held: u32,
    len: usize,
) -> Option<MeshError> {
    if object < held && (index as usize) < len {
        return None;
    }
    Some(MeshError::UnacquiredAccess {
        coord,
        channel: port.channel.clone(),
        port: port.port,
        object,
        index,
        held,
        len,
    })
}

#[cfg(test)]
mod tests;
