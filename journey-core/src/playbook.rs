//! Playbook model and manager
//!
//! A playbook is an immutable, versioned node graph grouped into worlds.
//! [`PlaybookManager`] indexes one loaded version by node id and answers the
//! read-only lookups the engine needs. Loading validates the graph: node ids
//! are unique, every `next`/`prerequisites` reference resolves, and the
//! combined edge set is acyclic.

use crate::{
    compute_content_hash, JourneyError, JourneyResult, PlaybookVersionId, ValidationError,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// DOCUMENT SHAPE
// ============================================================================

/// One file upload a node asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UploadRequirement {
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mime: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// Localized label keyed by locale.
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: BTreeMap<String, String>,
    /// Client-side accept hint, e.g. `.pdf,.docx`.
    #[serde(default)]
    pub accept: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Requirements {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uploads: Vec<UploadRequirement>,
}

/// Definition of one node. The containing world is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeDefinition {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: BTreeMap<String, String>,
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub requirements: Option<Requirements>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub prerequisites: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<String>,
}

impl NodeDefinition {
    /// Declared uploads, empty when the node has no requirements block.
    pub fn uploads(&self) -> &[UploadRequirement] {
        self.requirements
            .as_ref()
            .map(|r| r.uploads.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct World {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<NodeDefinition>,
}

/// Top-level playbook document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Playbook {
    #[serde(default)]
    pub playbook_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub locale_default: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub worlds: Vec<World>,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Process-scoped, immutable index over one playbook version.
#[derive(Debug, Clone)]
pub struct PlaybookManager {
    version_id: PlaybookVersionId,
    checksum: String,
    playbook: Playbook,
    nodes: HashMap<String, NodeDefinition>,
    node_worlds: HashMap<String, String>,
}

impl PlaybookManager {
    /// Parse, validate and index a playbook from its raw JSON bytes.
    pub fn from_bytes(raw: &[u8]) -> JourneyResult<Self> {
        let playbook: Playbook = serde_json::from_slice(raw)
            .map_err(|e| invalid(format!("parse playbook: {}", e)))?;
        let checksum = hex::encode(compute_content_hash(raw));
        Self::build(playbook, checksum)
    }

    /// Read and load a playbook file.
    pub fn from_path(path: impl AsRef<Path>) -> JourneyResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)
            .map_err(|e| invalid(format!("read playbook {}: {}", path.display(), e)))?;
        Self::from_bytes(&raw)
    }

    fn build(playbook: Playbook, checksum: String) -> JourneyResult<Self> {
        let mut nodes = HashMap::new();
        let mut node_worlds = HashMap::new();
        let mut order = Vec::new();

        for world in &playbook.worlds {
            for node in &world.nodes {
                if nodes.insert(node.id.clone(), node.clone()).is_some() {
                    return Err(invalid(format!("duplicate node id: {}", node.id)));
                }
                node_worlds.insert(node.id.clone(), world.id.clone());
                order.push(node.id.clone());
            }
        }

        for id in &order {
            let node = &nodes[id];
            for reference in node.next.iter().chain(node.prerequisites.iter()) {
                if !nodes.contains_key(reference) {
                    return Err(invalid(format!(
                        "node {} references unknown node {}",
                        id, reference
                    )));
                }
            }
        }

        check_acyclic(&order, &nodes)?;

        Ok(Self {
            version_id: PlaybookVersionId::from_checksum(&checksum),
            checksum,
            playbook,
            nodes,
            node_worlds,
        })
    }

    pub fn version_id(&self) -> PlaybookVersionId {
        self.version_id
    }

    /// SHA-256 hex of the raw playbook bytes.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Author-declared version label.
    pub fn version(&self) -> &str {
        &self.playbook.version
    }

    pub fn default_locale(&self) -> &str {
        &self.playbook.locale_default
    }

    pub fn playbook(&self) -> &Playbook {
        &self.playbook
    }

    pub fn node_definition(&self, node_id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(node_id)
    }

    /// Like [`node_definition`](Self::node_definition) but fails with `unknown node`.
    pub fn require_node(&self, node_id: &str) -> JourneyResult<&NodeDefinition> {
        self.node_definition(node_id)
            .ok_or_else(|| JourneyError::unknown_node(node_id))
    }

    /// World containing the node, or `""` when unknown.
    pub fn node_world(&self, node_id: &str) -> &str {
        self.node_worlds
            .get(node_id)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Node ids of a world in declaration order.
    pub fn nodes_in_world(&self, world_id: &str) -> Vec<&str> {
        self.playbook
            .worlds
            .iter()
            .filter(|w| w.id == world_id)
            .flat_map(|w| w.nodes.iter().map(|n| n.id.as_str()))
            .collect()
    }

    pub fn upload_requirement(&self, node_id: &str, slot_key: &str) -> Option<&UploadRequirement> {
        self.node_definition(node_id)?
            .uploads()
            .iter()
            .find(|u| u.key == slot_key)
    }
}

fn invalid(reason: String) -> JourneyError {
    JourneyError::Validation(ValidationError::InvalidPlaybook { reason })
}

/// Kahn's algorithm over `node -> next` and `prerequisite -> node` edges.
fn check_acyclic(order: &[String], nodes: &HashMap<String, NodeDefinition>) -> JourneyResult<()> {
    let mut edges: HashMap<&str, HashSet<&str>> = HashMap::new();
    for id in order {
        let node = &nodes[id];
        for succ in &node.next {
            edges.entry(id.as_str()).or_default().insert(succ.as_str());
        }
        for pre in &node.prerequisites {
            edges.entry(pre.as_str()).or_default().insert(id.as_str());
        }
    }

    let mut in_degree: HashMap<&str, usize> = order.iter().map(|id| (id.as_str(), 0)).collect();
    for targets in edges.values() {
        for target in targets {
            if let Some(d) = in_degree.get_mut(target) {
                *d += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(targets) = edges.get(id) {
            for target in targets {
                if let Some(d) = in_degree.get_mut(target) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*target);
                    }
                }
            }
        }
    }

    if visited != order.len() {
        let mut stuck: Vec<&str> = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id)
            .collect();
        stuck.sort_unstable();
        return Err(invalid(format!("cycle detected among nodes: {}", stuck.join(", "))));
    }

    Ok(())
}
