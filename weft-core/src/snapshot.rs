//! Tree Snapshots
//!
//! A serializable picture of a mounted root, for debugging tools and tests.

use indexmap::IndexMap;
use serde::Serialize;

use crate::graph::{Instance, InstanceId};

/// One instance and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
    pub id: u64,
    pub component: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub phase: &'static str,
    pub render_count: u64,
    pub cells: Vec<&'static str>,
    pub suspended: bool,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caught_error: Option<String>,
    pub children: Vec<InstanceSnapshot>,
}

/// Snapshot of a whole root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSnapshot {
    pub root: InstanceSnapshot,
}

impl TreeSnapshot {
    pub(crate) fn capture(tree: &IndexMap<InstanceId, Instance>, root: InstanceId) -> Option<Self> {
        capture_instance(tree, root).map(|root| Self { root })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Number of instances in the snapshot.
    pub fn instance_count(&self) -> usize {
        fn count(node: &InstanceSnapshot) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    /// Find the first instance of a component, depth first.
    pub fn find(&self, component: &str) -> Option<&InstanceSnapshot> {
        fn walk<'a>(node: &'a InstanceSnapshot, component: &str) -> Option<&'a InstanceSnapshot> {
            if node.component == component {
                return Some(node);
            }
            node.children.iter().find_map(|child| walk(child, component))
        }
        walk(&self.root, component)
    }
}

fn capture_instance(tree: &IndexMap<InstanceId, Instance>, id: InstanceId) -> Option<InstanceSnapshot> {
    let instance = tree.get(&id)?;
    Some(InstanceSnapshot {
        id: id.raw(),
        component: instance.name(),
        key: instance.key.clone(),
        phase: instance.phase().as_str(),
        render_count: instance.render_count,
        cells: instance.cell_kinds().iter().map(|kind| kind.as_str()).collect(),
        suspended: instance.suspended,
        failed: instance.failed,
        caught_error: instance.caught_error().map(ToString::to_string),
        children: instance
            .children
            .iter()
            .filter_map(|child| capture_instance(tree, *child))
            .collect(),
    })
}
