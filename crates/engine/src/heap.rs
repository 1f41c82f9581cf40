//! Heap profile parsing.
//!
//! A heap artifact (snapshot or timeline) is a JSON object whose `nodes` array
//! is a flat list of fixed-width node records and whose `samples` array is a
//! flat list of `(timestamp_us, last_assigned_id)` checkpoints. Only the node
//! `id` and `self_size` fields are retained; edges, names and strings are
//! ignored.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Number of fields per node when the artifact carries no layout metadata
/// (`type, name, id, self_size, edge_count, trace_node_id`).
pub const DEFAULT_NODE_FIELD_COUNT: usize = 6;

/// Number of fields per sample (`timestamp_us, last_assigned_id`).
pub const SAMPLE_FIELD_COUNT: usize = 2;

const DEFAULT_ID_OFFSET: usize = 2;
const DEFAULT_SELF_SIZE_OFFSET: usize = 3;

/// A heap object reduced to what leak sizing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapNode {
    /// Allocation-ordered object id assigned by the runtime.
    pub id: u64,
    /// Shallow size in bytes.
    pub self_size: u64,
}

/// Checkpoint stating that every node with `id <= last_assigned_id` existed
/// by `timestamp_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Microseconds since heap tracking started.
    pub timestamp_us: u64,
    /// Highest node id allocated at that moment.
    pub last_assigned_id: u64,
}

/// Parsed heap artifact: node sizes keyed by id plus the sample checkpoints.
///
/// The sample list is empty for a single-point-in-time snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeapProfile {
    nodes: BTreeMap<u64, u64>,
    samples: Vec<Sample>,
}

#[derive(Deserialize)]
struct RawArtifact {
    #[serde(default)]
    snapshot: Option<RawSnapshotHeader>,
    nodes: Vec<u64>,
    samples: Vec<u64>,
}

#[derive(Deserialize)]
struct RawSnapshotHeader {
    #[serde(default)]
    meta: Option<RawMeta>,
}

#[derive(Deserialize)]
struct RawMeta {
    #[serde(default)]
    node_fields: Vec<String>,
}

/// Where `id` and `self_size` live inside one node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeLayout {
    stride: usize,
    id_offset: usize,
    self_size_offset: usize,
}

impl Default for NodeLayout {
    fn default() -> Self {
        Self {
            stride: DEFAULT_NODE_FIELD_COUNT,
            id_offset: DEFAULT_ID_OFFSET,
            self_size_offset: DEFAULT_SELF_SIZE_OFFSET,
        }
    }
}

impl NodeLayout {
    fn from_header(header: Option<&RawSnapshotHeader>) -> Result<Self> {
        let fields = match header.and_then(|h| h.meta.as_ref()) {
            Some(meta) if !meta.node_fields.is_empty() => &meta.node_fields,
            _ => return Ok(Self::default()),
        };

        let position = |name: &str| {
            fields
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| Error::parse(format!("node_fields has no '{name}' entry")))
        };

        Ok(Self {
            stride: fields.len(),
            id_offset: position("id")?,
            self_size_offset: position("self_size")?,
        })
    }
}

impl ParsedHeapProfile {
    /// Build a profile directly from nodes and samples.
    ///
    /// A repeated id keeps the last size seen.
    pub fn from_parts(nodes: impl IntoIterator<Item = HeapNode>, samples: Vec<Sample>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n.self_size)).collect(),
            samples,
        }
    }

    /// Parse an artifact from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if the JSON is invalid, `nodes` or `samples` is
    /// missing, or either array's length is not a multiple of its stride.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Parse an artifact from a reader.
    ///
    /// # Errors
    ///
    /// Same as [`ParsedHeapProfile::from_json`].
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let raw: RawArtifact = serde_json::from_reader(reader)?;
        Self::from_raw(raw)
    }

    /// Load and parse an artifact file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Core` if the file cannot be read and `Error::Parse` if
    /// its content is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = sealant_core::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn from_raw(raw: RawArtifact) -> Result<Self> {
        let layout = NodeLayout::from_header(raw.snapshot.as_ref())?;

        if raw.nodes.len() % layout.stride != 0 {
            return Err(Error::parse(format!(
                "nodes length {} is not a multiple of {}",
                raw.nodes.len(),
                layout.stride
            )));
        }
        if raw.samples.len() % SAMPLE_FIELD_COUNT != 0 {
            return Err(Error::parse(format!(
                "samples length {} is not a multiple of {SAMPLE_FIELD_COUNT}",
                raw.samples.len()
            )));
        }

        let nodes = raw
            .nodes
            .chunks_exact(layout.stride)
            .filter_map(|record| {
                let id = record.get(layout.id_offset)?;
                let self_size = record.get(layout.self_size_offset)?;
                Some((*id, *self_size))
            })
            .collect::<BTreeMap<_, _>>();

        let samples = raw
            .samples
            .chunks_exact(SAMPLE_FIELD_COUNT)
            .filter_map(|pair| match pair {
                [timestamp_us, last_assigned_id] => Some(Sample {
                    timestamp_us: *timestamp_us,
                    last_assigned_id: *last_assigned_id,
                }),
                _ => None,
            })
            .collect::<Vec<_>>();

        debug!(
            nodes = nodes.len(),
            samples = samples.len(),
            stride = layout.stride,
            "Parsed heap artifact"
        );

        Ok(Self { nodes, samples })
    }

    /// Node sizes keyed by id, in ascending id order.
    #[must_use]
    pub const fn nodes(&self) -> &BTreeMap<u64, u64> {
        &self.nodes
    }

    /// Sample checkpoints in artifact order.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this artifact is a timeline (carries sample checkpoints).
    #[must_use]
    pub fn is_timeline(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Sum of every node's self size, in bytes.
    #[must_use]
    pub fn total_self_size(&self) -> u64 {
        self.nodes.values().copied().fold(0_u64, u64::saturating_add)
    }
}
