//! Graph validation: run this before persisting an automation.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the automation.
//! 2. Every node type must be registered in the executor registry.
//! 3. Every edge must reference valid node IDs (both `source` and `target`).
//! 4. At most one edge leaves a node through the same handle.
//! 5. Condition nodes have `true` and `false` edges; split nodes `A` and `B`.
//! 6. Exactly one start node (a `trigger` node, or one marked `start`).
//! 7. Every node is reachable from the start node.
//!
//! Cycles are allowed: loop-backs through a delay are a legitimate pattern,
//! and the executor's per-invocation step limit breaks runaway loops.

use std::collections::{HashMap, HashSet, VecDeque};

use nodes::NodeRegistry;

use crate::{models::Automation, EngineError};

/// Validate the automation graph and return the start node ID.
pub fn validate_graph<'a>(automation: &'a Automation, registry: &NodeRegistry) -> Result<&'a str, EngineError> {
    // -----------------------------------------------------------------------
    // 1–2. Unique, registered nodes
    // -----------------------------------------------------------------------
    let mut node_set: HashSet<&str> = HashSet::new();
    for node in &automation.nodes {
        if !node_set.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
        if !registry.contains(&node.node_type) {
            return Err(EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3–4. Edge endpoints and handle uniqueness
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut handles: HashSet<(&str, Option<&str>)> = HashSet::new();

    for edge in &automation.edges {
        if !node_set.contains(edge.source.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.source.clone(), side: "source" });
        }
        if !node_set.contains(edge.target.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.target.clone(), side: "target" });
        }
        if !handles.insert((edge.source.as_str(), edge.handle())) {
            return Err(EngineError::DuplicateBranch {
                node_id: edge.source.clone(),
                handle: edge.handle().unwrap_or("default").to_owned(),
            });
        }
        adjacency.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
    }

    // -----------------------------------------------------------------------
    // 5. Branch completeness
    // -----------------------------------------------------------------------
    for node in &automation.nodes {
        for handle in node.required_handles() {
            if !handles.contains(&(node.id.as_str(), Some(*handle))) {
                return Err(EngineError::MissingBranch { node_id: node.id.clone(), handle: (*handle).to_owned() });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 6. Single start node
    // -----------------------------------------------------------------------
    let starts: Vec<&str> = automation.nodes.iter().filter(|n| n.is_start()).map(|n| n.id.as_str()).collect();
    let start = match starts.as_slice() {
        [] => return Err(EngineError::MissingStartNode),
        [only] => *only,
        many => return Err(EngineError::MultipleStartNodes(many.iter().map(|s| s.to_string()).collect())),
    };

    // -----------------------------------------------------------------------
    // 7. Reachability (breadth-first from the start node)
    // -----------------------------------------------------------------------
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(node_id) = queue.pop_front() {
        for &next in adjacency.get(node_id).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    if let Some(orphan) = automation.nodes.iter().find(|n| !visited.contains(n.id.as_str())) {
        return Err(EngineError::UnreachableNode(orphan.id.clone()));
    }

    Ok(start)
}
