//! Object fifos: named, typed, depth-bounded channels between tiles.
//!
//! A channel has one producer tile and one or more consumer tiles. The
//! declaration side lives here ([`ChannelManager`]); the slot accounting
//! used at run time lives in [`ring`].

pub mod ring;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceConfig;
use crate::error::MeshError;
use crate::tile::{TileCoord, TileHandle, TileRegistry};
use crate::types::ElementType;

pub use ring::{Grant, RingError, SlotRange, SlotRing};

/// Side of a channel a program holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    Produce,
    Consume,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Port::Produce => "Produce",
            Port::Consume => "Consume",
        })
    }
}

/// Reference to a declared channel. Channels are identified by name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelHandle {
    name: String,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn produce(&self) -> PortHandle {
        PortHandle::new(&self.name, Port::Produce)
    }

    pub fn consume(&self) -> PortHandle {
        PortHandle::new(&self.name, Port::Consume)
    }
}

/// A (channel, direction) pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortHandle {
    pub channel: String,
    pub port: Port,
}

impl PortHandle {
    pub fn new(channel: &str, port: Port) -> Self {
        Self {
            channel: channel.to_string(),
            port,
        }
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}({})", self.channel, self.port)
    }
}

/// Declaration record for one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDecl {
    pub name: String,
    pub producer: TileCoord,
    pub consumers: Vec<TileCoord>,
    pub depth: u32,
    pub element: ElementType,
}

impl ChannelDecl {
    pub fn is_broadcast(&self) -> bool {
        self.consumers.len() > 1
    }

    /// Position of `tile` among the consumers.
    pub fn consumer_index(&self, tile: TileCoord) -> Option<usize> {
        self.consumers.iter().position(|c| *c == tile)
    }

    /// Whether `tile` holds the given side of this channel.
    pub fn is_endpoint(&self, tile: TileCoord, port: Port) -> bool {
        match port {
            Port::Produce => self.producer == tile,
            Port::Consume => self.consumers.contains(&tile),
        }
    }
}

/// Registry of declared channels, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct ChannelManager {
    channels: Vec<ChannelDecl>,
    by_name: HashMap<String, usize>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a point-to-point channel.
    #[allow(clippy::too_many_arguments)]
    pub fn create_channel(
        &mut self,
        tiles: &TileRegistry,
        device: &DeviceConfig,
        name: &str,
        producer: TileHandle,
        consumer: TileHandle,
        depth: u32,
        element: ElementType,
    ) -> Result<ChannelHandle, MeshError> {
        self.insert(
            tiles,
            device,
            ChannelDecl {
                name: name.to_string(),
                producer: producer.coord(),
                consumers: vec![consumer.coord()],
                depth,
                element,
            },
        )
    }

    /// Create a channel whose every element is delivered to each consumer.
    #[allow(clippy::too_many_arguments)]
    pub fn create_broadcast_channel(
        &mut self,
        tiles: &TileRegistry,
        device: &DeviceConfig,
        name: &str,
        producer: TileHandle,
        consumers: &[TileHandle],
        depth: u32,
        element: ElementType,
    ) -> Result<ChannelHandle, MeshError> {
        self.insert(
            tiles,
            device,
            ChannelDecl {
                name: name.to_string(),
                producer: producer.coord(),
                consumers: consumers.iter().map(TileHandle::coord).collect(),
                depth,
                element,
            },
        )
    }

    /// Validate and register a declaration.
    pub fn insert(
        &mut self,
        tiles: &TileRegistry,
        device: &DeviceConfig,
        decl: ChannelDecl,
    ) -> Result<ChannelHandle, MeshError> {
        if self.by_name.contains_key(&decl.name) {
            return Err(MeshError::DuplicateChannelName { channel: decl.name });
        }
        if decl.depth < 1 || decl.depth > device.max_fifo_depth {
            return Err(MeshError::InvalidDepth {
                channel: decl.name,
                depth: decl.depth,
                max: device.max_fifo_depth,
            });
        }
        let context = format!("channel '{}'", decl.name);
        tiles.resolve(decl.producer, &context)?;
        if decl.consumers.is_empty() {
            return Err(MeshError::Liveness {
                channel: decl.name,
                reason: "no consumer tile is declared".to_string(),
            });
        }
        for (i, consumer) in decl.consumers.iter().enumerate() {
            tiles.resolve(*consumer, &context)?;
            if decl.consumers[..i].contains(consumer) {
                return Err(MeshError::Liveness {
                    channel: decl.name.clone(),
                    reason: format!("{} is listed as a consumer twice", consumer),
                });
            }
        }
        if decl.element.is_empty() {
            return Err(MeshError::EmptyElementType { channel: decl.name });
        }
        let max = device.max_element_bytes();
        if decl.element.checked_bytes().map_or(true, |bytes| bytes > max) {
            return Err(MeshError::ElementTooLarge {
                channel: decl.name,
                element: decl.element.to_string(),
                max,
            });
        }

        tracing::debug!(
            channel = %decl.name,
            producer = %decl.producer,
            consumers = decl.consumers.len(),
            depth = decl.depth,
            element = %decl.element,
            "created channel"
        );
        let handle = ChannelHandle {
            name: decl.name.clone(),
        };
        self.by_name.insert(decl.name.clone(), self.channels.len());
        self.channels.push(decl);
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<&ChannelDecl> {
        self.by_name.get(name).map(|&i| &self.channels[i])
    }

    /// Resolve a name; `context` names the referencing declaration.
    pub fn resolve(&self, name: &str, context: &str) -> Result<&ChannelDecl, MeshError> {
        self.get(name).ok_or_else(|| MeshError::UnknownChannel {
            channel: name.to_string(),
            context: context.to_string(),
        })
    }

    pub fn handle(&self, name: &str) -> Option<ChannelHandle> {
        self.get(name).map(|c| ChannelHandle {
            name: c.name.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDecl> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
