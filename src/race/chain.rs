//! Stream dependency chains and race sets
//!
//! A chain is a linear priority path: the root depends on nothing and every
//! later stream depends on its predecessor. A race set hangs off the chain's
//! tail, so the peer schedules its members only after the whole chain, with
//! no order among the members themselves.

use super::assembler::{DependencyLink, RequestAssembler, WithheldRequest};
use crate::http::h2::error::{ConnectionError, Result};
use crate::http::h2::frames::FrameSequence;
use crate::http::h2::request::RequestSpec;
use crate::http::h2::stream::StreamId;
use std::collections::BTreeMap;

/// Linear dependency path, root first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyChain {
    ids: Vec<StreamId>,
    links: Vec<DependencyLink>,
}

impl DependencyChain {
    /// Stream ids in chain (and send) order
    pub fn ids(&self) -> &[StreamId] {
        &self.ids
    }

    pub fn root(&self) -> Option<StreamId> {
        self.ids.first().copied()
    }

    pub fn tail(&self) -> Option<StreamId> {
        self.ids.last().copied()
    }

    /// One link per stream after the root
    pub fn links(&self) -> &[DependencyLink] {
        &self.links
    }

    /// The stream `stream_id` depends on, if it has a link
    pub fn depends_on(&self, stream_id: StreamId) -> Option<StreamId> {
        self.links
            .iter()
            .find(|link| link.stream_id == stream_id)
            .map(|link| link.depends_on)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Streams that all depend on one chain tail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSet {
    tail: StreamId,
    links: Vec<DependencyLink>,
}

impl RaceSet {
    pub fn tail(&self) -> StreamId {
        self.tail
    }

    pub fn links(&self) -> &[DependencyLink] {
        &self.links
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.links.iter().map(|link| link.stream_id).collect()
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.links.iter().any(|link| link.stream_id == stream_id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Builds chains and race sets with a fixed weight and exclusivity
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyChainBuilder {
    weight: u8,
    exclusive: bool,
}

impl DependencyChainBuilder {
    /// Weight 0, non-exclusive
    pub fn new() -> Self {
        DependencyChainBuilder::default()
    }

    pub fn weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    fn link(&self, stream_id: StreamId, depends_on: StreamId) -> DependencyLink {
        DependencyLink::new(stream_id, depends_on)
            .with_weight(self.weight)
            .with_exclusive(self.exclusive)
    }

    /// Full requests of `spec` on `ids`, each depending on the one before
    ///
    /// The returned sequences are in chain order, which is also the order they
    /// must be sent in.
    pub fn build_chain(
        &self,
        assembler: &mut RequestAssembler<'_>,
        spec: &RequestSpec,
        ids: &[StreamId],
    ) -> Result<(DependencyChain, Vec<FrameSequence>)> {
        if ids.is_empty() {
            return Err(ConnectionError::InvalidChain("No stream ids for the chain".to_string()));
        }
        if let Some(pair) = ids.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(ConnectionError::InvalidChain(format!(
                "Chain ids must increase: {} follows {}",
                pair[1], pair[0]
            )));
        }

        let mut links = Vec::with_capacity(ids.len() - 1);
        let mut sequences = Vec::with_capacity(ids.len());
        sequences.push(assembler.build(spec, ids[0], false)?);
        for pair in ids.windows(2) {
            let link = self.link(pair[1], pair[0]);
            sequences.push(assembler.build_dependent(spec, &link, false)?);
            links.push(link);
        }

        Ok((
            DependencyChain {
                ids: ids.to_vec(),
                links,
            },
            sequences,
        ))
    }

    /// Withheld requests for every entry of `specs`, each depending on `tail`
    ///
    /// Requests come back in ascending stream id order.
    pub fn build_race_set(
        &self,
        assembler: &mut RequestAssembler<'_>,
        specs: &BTreeMap<StreamId, RequestSpec>,
        tail: StreamId,
    ) -> Result<(RaceSet, Vec<WithheldRequest>)> {
        let mut links = Vec::with_capacity(specs.len());
        let mut requests = Vec::with_capacity(specs.len());
        for (&stream_id, spec) in specs {
            let link = self.link(stream_id, tail);
            requests.push(assembler.build_withheld(spec, stream_id, Some(&link))?);
            links.push(link);
        }
        Ok((RaceSet { tail, links }, requests))
    }
}
