//! Tile registry: coordinate-unique tiles tagged with a role.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::error::MeshError;

/// (column, row) position of a tile on the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub col: u8,
    pub row: u8,
}

impl TileCoord {
    pub const fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }

    /// SSA-style symbol used in emitted text, e.g. `tile_0_2`.
    pub fn symbol(&self) -> String {
        format!("tile_{}_{}", self.col, self.row)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile({}, {})", self.col, self.row)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileRole {
    Shim,
    Memory,
    Compute,
}

impl fmt::Display for TileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TileRole::Shim => "shim",
            TileRole::Memory => "memory",
            TileRole::Compute => "compute",
        })
    }
}

/// Reference to a declared tile. Tiles are identified by coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileHandle {
    coord: TileCoord,
}

impl TileHandle {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }
}

/// Declaration record for one tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDecl {
    pub coord: TileCoord,
    pub role: TileRole,
}

/// Single source of truth for coordinate uniqueness.
#[derive(Clone, Debug, Default)]
pub struct TileRegistry {
    tiles: BTreeMap<TileCoord, TileRole>,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tile, checking uniqueness and the device row layout.
    pub fn declare_tile(
        &mut self,
        device: &DeviceConfig,
        coord: TileCoord,
        role: TileRole,
    ) -> Result<TileHandle, MeshError> {
        if self.tiles.contains_key(&coord) {
            return Err(MeshError::DuplicateTile { coord });
        }
        match device.role_at(coord) {
            None => {
                return Err(MeshError::TileOutsideDevice {
                    coord,
                    device: device.name().to_string(),
                })
            }
            Some(actual) if actual != role => {
                return Err(MeshError::RoleMismatch {
                    coord,
                    declared: role,
                    actual,
                })
            }
            Some(_) => {}
        }
        self.tiles.insert(coord, role);
        tracing::debug!(%coord, %role, "declared tile");
        Ok(TileHandle { coord })
    }

    /// Look up a tile by coordinate; `context` names the referencing declaration.
    pub fn resolve(&self, coord: TileCoord, context: &str) -> Result<TileHandle, MeshError> {
        if self.tiles.contains_key(&coord) {
            Ok(TileHandle { coord })
        } else {
            Err(MeshError::TileNotFound {
                coord,
                context: context.to_string(),
            })
        }
    }

    pub fn role(&self, tile: TileHandle) -> Option<TileRole> {
        self.tiles.get(&tile.coord).copied()
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (TileHandle, TileRole)> + '_ {
        self.tiles
            .iter()
            .map(|(coord, role)| (TileHandle { coord: *coord }, *role))
    }
}
