//! Target device variants.
//!
//! A device fixes the tile-coordinate layout (which rows hold shim,
//! memory, and compute tiles, and how many columns exist) and the
//! per-tile capacity limits the verifier checks channels against.
//! Lock, memory, and DMA counts follow the AIE-ML architecture manual.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::Serialize;

use crate::diagnostic::Diagnostic;
use crate::error::MeshError;
use crate::span::Span;
use crate::tile::{TileCoord, TileRole};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceKind {
    Npu1Col1,
    Npu1Col4,
    Npu2Col1,
    Npu2Col4,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::Npu1Col1,
        DeviceKind::Npu1Col4,
        DeviceKind::Npu2Col1,
        DeviceKind::Npu2Col4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Npu1Col1 => "npu1_1col",
            DeviceKind::Npu1Col4 => "npu1_4col",
            DeviceKind::Npu2Col1 => "npu2_1col",
            DeviceKind::Npu2Col4 => "npu2_4col",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceKind {
    type Err = Diagnostic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npu" | "npu1_1col" => Ok(DeviceKind::Npu1Col1),
            "npu1_4col" => Ok(DeviceKind::Npu1Col4),
            "npu2" | "npu2_1col" => Ok(DeviceKind::Npu2Col1),
            "npu2_4col" => Ok(DeviceKind::Npu2Col4),
            _ => {
                let names: Vec<&str> = DeviceKind::ALL.iter().map(|k| k.name()).collect();
                Err(MeshError::UnknownDevice(s.to_string())
                    .to_diagnostic(Span::dummy())
                    .with_note(format!("known devices: {}", names.join(", ")))
                    .with_help("'npu' and 'npu2' select the single-column variants".to_string()))
            }
        }
    }
}

/// Architecture generation; NPU1 is AIE-ML, NPU2 is AIE-ML v2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Generation {
    AieMl,
    AieMlV2,
}

/// Per-role resource budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TileBudget {
    /// Data memory available for fifo buffers, in bytes.
    pub memory_bytes: u64,
    /// Semaphore locks.
    pub locks: u32,
    /// DMA channels per direction (MM2S out, S2MM in).
    pub dma_channels: u32,
}

/// Layout and capacity limits of one device variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub generation: Generation,
    pub columns: u8,
    pub shim_row: u8,
    pub memory_rows: RangeInclusive<u8>,
    pub compute_rows: RangeInclusive<u8>,
    pub shim: TileBudget,
    pub memory: TileBudget,
    pub compute: TileBudget,
    /// Largest depth a single object fifo may declare.
    pub max_fifo_depth: u32,
}

impl DeviceConfig {
    /// Both generations share one layout and one budget table; they
    /// differ only in name and column count.
    pub fn for_kind(kind: DeviceKind) -> Self {
        let (generation, columns) = match kind {
            DeviceKind::Npu1Col1 => (Generation::AieMl, 1),
            DeviceKind::Npu1Col4 => (Generation::AieMl, 4),
            DeviceKind::Npu2Col1 => (Generation::AieMlV2, 1),
            DeviceKind::Npu2Col4 => (Generation::AieMlV2, 4),
        };
        Self {
            kind,
            generation,
            columns,
            shim_row: 0,
            memory_rows: 1..=1,
            compute_rows: 2..=5,
            // shim tiles own no data memory; their buffers live in host DDR
            shim: TileBudget {
                memory_bytes: 0,
                locks: 16,
                dma_channels: 2,
            },
            memory: TileBudget {
                memory_bytes: 512 * 1024,
                locks: 64,
                dma_channels: 6,
            },
            compute: TileBudget {
                memory_bytes: 64 * 1024,
                locks: 16,
                dma_channels: 2,
            },
            max_fifo_depth: 32,
        }
    }

    /// Resolve a device by name, failing with an `unknown-device` diagnostic.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        name.parse::<DeviceKind>().map(Self::for_kind)
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Role the device layout assigns to a coordinate, if it is on the device.
    pub fn role_at(&self, coord: TileCoord) -> Option<TileRole> {
        if coord.col >= self.columns {
            return None;
        }
        if coord.row == self.shim_row {
            Some(TileRole::Shim)
        } else if self.memory_rows.contains(&coord.row) {
            Some(TileRole::Memory)
        } else if self.compute_rows.contains(&coord.row) {
            Some(TileRole::Compute)
        } else {
            None
        }
    }

    pub fn budget(&self, role: TileRole) -> TileBudget {
        match role {
            TileRole::Shim => self.shim,
            TileRole::Memory => self.memory,
            TileRole::Compute => self.compute,
        }
    }

    pub fn rows(&self) -> u8 {
        *self.compute_rows.end() + 1
    }

    /// Largest element any tile on the device could hold one copy of.
    pub fn max_element_bytes(&self) -> u64 {
        [self.shim, self.memory, self.compute]
            .iter()
            .map(|b| b.memory_bytes)
            .max()
            .unwrap_or(0)
    }
}
