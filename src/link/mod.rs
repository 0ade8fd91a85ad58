//! Fan-in links: several single-producer channels joined into one sink.
//!
//! The sink's slots are the shared transit capacity of the join. Every
//! sink object receives exactly one contribution from each source, packed
//! in the order the sources were granted the object. See [`join`] for the
//! run-time half.

pub mod join;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::fifo::{ChannelHandle, ChannelManager};

pub use join::{JoinGrant, JoinState, SegmentGrant};

/// Declaration record for one link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDecl {
    pub sources: Vec<String>,
    pub sink: String,
}

impl LinkDecl {
    pub fn new(sources: &[ChannelHandle], sink: &ChannelHandle) -> Self {
        Self {
            sources: sources.iter().map(|s| s.name().to_string()).collect(),
            sink: sink.name().to_string(),
        }
    }
}

/// All links of a graph, with the ownership maps the verifier relies on.
#[derive(Clone, Debug, Default)]
pub struct LinkTable {
    links: Vec<LinkDecl>,
    /// source channel name -> link index
    source_of: HashMap<String, usize>,
    /// sink channel name -> link index
    sink_of: HashMap<String, usize>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `sources` into `sink`.
    pub fn link(
        &mut self,
        channels: &ChannelManager,
        sources: &[ChannelHandle],
        sink: &ChannelHandle,
    ) -> Result<(), MeshError> {
        self.insert(channels, LinkDecl::new(sources, sink))
    }

    /// Validate and register a declaration.
    pub fn insert(&mut self, channels: &ChannelManager, decl: LinkDecl) -> Result<(), MeshError> {
        let context = format!("the link into '{}'", decl.sink);
        let sink = channels.resolve(&decl.sink, &context)?;
        let arity = |reason: String| MeshError::LinkArityMismatch {
            sink: decl.sink.clone(),
            reason,
        };

        if decl.sources.is_empty() {
            return Err(arity("a link needs at least one source".to_string()));
        }
        if self.sink_of.contains_key(&decl.sink) {
            return Err(arity("the sink is already fed by another link".to_string()));
        }
        if sink.consumers.len() != 1 {
            return Err(arity(format!(
                "the sink must have exactly one consumer tile, found {}",
                sink.consumers.len()
            )));
        }

        let mut total_len = 0usize;
        for (i, name) in decl.sources.iter().enumerate() {
            let source = channels.resolve(name, &context)?;
            if *name == decl.sink {
                return Err(MeshError::LinkCycle {
                    channel: name.clone(),
                });
            }
            if decl.sources[..i].contains(name) || self.source_of.contains_key(name) {
                let owner = self
                    .source_of
                    .get(name)
                    .map(|&l| self.links[l].sink.clone())
                    .unwrap_or_else(|| decl.sink.clone());
                return Err(MeshError::AlreadyLinked {
                    channel: name.clone(),
                    sink: owner,
                });
            }
            if source.consumers.len() != 1 {
                return Err(arity(format!(
                    "source '{}' must have exactly one consumer tile, found {}",
                    name,
                    source.consumers.len()
                )));
            }
            if source.consumers[0] != sink.producer {
                return Err(arity(format!(
                    "source '{}' delivers to {}, but the sink is produced by {}",
                    name, source.consumers[0], sink.producer
                )));
            }
            if source.element.scalar != sink.element.scalar {
                return Err(arity(format!(
                    "source '{}' carries {} elements, the sink carries {}",
                    name, source.element.scalar, sink.element.scalar
                )));
            }
            total_len += source.element.len();
        }
        if total_len != sink.element.len() {
            return Err(arity(format!(
                "sources carry {} scalars per object in total, the sink element holds {}",
                total_len,
                sink.element.len()
            )));
        }

        tracing::debug!(sink = %decl.sink, sources = ?decl.sources, "linked channels");
        let index = self.links.len();
        for name in &decl.sources {
            self.source_of.insert(name.clone(), index);
        }
        self.sink_of.insert(decl.sink.clone(), index);
        self.links.push(decl);
        Ok(())
    }

    /// The link a channel feeds as a source.
    pub fn link_of_source(&self, channel: &str) -> Option<&LinkDecl> {
        self.source_of.get(channel).map(|&i| &self.links[i])
    }

    /// The link that produces into a channel.
    pub fn link_of_sink(&self, channel: &str) -> Option<&LinkDecl> {
        self.sink_of.get(channel).map(|&i| &self.links[i])
    }

    pub fn is_source(&self, channel: &str) -> bool {
        self.source_of.contains_key(channel)
    }

    pub fn is_sink(&self, channel: &str) -> bool {
        self.sink_of.contains_key(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkDecl> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
