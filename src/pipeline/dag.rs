// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Dependency forest builder
//!
//! Every node has exactly one input, so a valid pipeline is a forest rooted
//! at the nodes reading the external input. The builder resolves input
//! references, rejects cycles and fixes a stable execution order.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::errors::ReconflowError;
use crate::pipeline::{PipelineSpec, EXTERNAL_SOURCE};

/// The validated dependency structure of a pipeline
#[derive(Debug, Clone)]
pub struct Forest {
    /// Edge parent -> child; weights are declaration indices
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    names: Vec<String>,
    parents: Vec<Option<usize>>,
    order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Walk {
    Unvisited,
    OnPath,
    Done,
}

impl Forest {
    /// Build the forest of a pipeline, reporting every unresolved reference
    /// and every distinct cycle
    pub fn build(spec: &PipelineSpec) -> Result<Self, Vec<ReconflowError>> {
        let linked = link(spec, &HashSet::new());
        if !linked.errors.is_empty() {
            return Err(linked.errors);
        }

        let mut forest = Self {
            graph: linked.graph,
            name_to_index: linked.name_to_index,
            names: spec.nodes.iter().map(|n| n.name.clone()).collect(),
            parents: linked.parents,
            order: Vec::new(),
        };
        forest.order = forest.compute_order();
        Ok(forest)
    }

    /// Reference and cycle errors among the nodes of a document that failed
    /// schema checks.
    ///
    /// `declared` holds every name the document declares, so a reference to
    /// a node that was left out of `spec` still resolves. A duplicated name
    /// resolves to its first declaration.
    pub fn check_partial(spec: &PipelineSpec, declared: &HashSet<String>) -> Vec<ReconflowError> {
        link(spec, declared).errors
    }

    /// Roots in declaration order, then depth-first in child declaration order
    fn compute_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.names.len());
        let mut stack: Vec<usize> = self.roots().into_iter().rev().collect();

        while let Some(idx) = stack.pop() {
            order.push(idx);
            let mut children = self.children_of(idx);
            children.reverse();
            stack.extend(children);
        }

        order
    }

    fn children_of(&self, idx: usize) -> Vec<usize> {
        let n = self.name_to_index[&self.names[idx]];
        let mut children: Vec<usize> = self
            .graph
            .neighbors_directed(n, Direction::Outgoing)
            .map(|c| self.graph[c])
            .collect();
        children.sort_unstable();
        children
    }

    /// Declaration indices of nodes reading the external input
    pub fn roots(&self) -> Vec<usize> {
        (0..self.names.len())
            .filter(|&i| self.parents[i].is_none())
            .collect()
    }

    /// Number of independent trees
    pub fn tree_count(&self) -> usize {
        self.roots().len()
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Declaration indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Node names in execution order
    pub fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).map(|&n| self.graph[n])
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Declaration index of a node's parent
    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parents[idx]
    }

    /// Direct children of a node, in declaration order
    pub fn children(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.index_of(name)?;
        Some(
            self.children_of(idx)
                .into_iter()
                .map(|c| self.names[c].as_str())
                .collect(),
        )
    }

    /// Path from the root of the node's tree down to the node itself
    pub fn ancestry(&self, idx: usize) -> Vec<&str> {
        let mut path = vec![self.names[idx].as_str()];
        let mut cur = idx;
        while let Some(p) = self.parents[cur] {
            path.push(&self.names[p]);
            cur = p;
        }
        path.reverse();
        path
    }

    /// Number of edges between a node and its root
    pub fn depth(&self, idx: usize) -> usize {
        self.ancestry(idx).len() - 1
    }

    /// Generate Mermaid diagram of the forest
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        out.push_str(&format!("    src(({}))\n", EXTERNAL_SOURCE));

        for &idx in &self.order {
            out.push_str(&format!("    n{}[\"{}\"]\n", idx, self.names[idx]));
        }

        for &idx in &self.order {
            match self.parents[idx] {
                Some(p) => out.push_str(&format!("    n{} --> n{}\n", p, idx)),
                None => out.push_str(&format!("    src --> n{}\n", idx)),
            }
        }

        out
    }

    /// Generate DOT diagram of the forest
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n");
        out.push_str(&format!("    \"{}\" [shape=ellipse];\n\n", EXTERNAL_SOURCE));

        for &idx in &self.order {
            let from = match self.parents[idx] {
                Some(p) => self.names[p].as_str(),
                None => EXTERNAL_SOURCE,
            };
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, self.names[idx]));
        }

        out.push_str("}\n");
        out
    }

    /// Indented execution order, one node per line
    pub fn to_text(&self, spec: &PipelineSpec) -> String {
        let mut out = String::new();

        for (i, &idx) in self.order.iter().enumerate() {
            let node = &spec.nodes[idx];
            out.push_str(&format!(
                "{:>3}. {}{} ({} {}) <- {}\n",
                i + 1,
                "  ".repeat(self.depth(idx)),
                node.name,
                node.software,
                node.action,
                node.input
            ));
        }

        out
    }
}

struct Linked {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    parents: Vec<Option<usize>>,
    errors: Vec<ReconflowError>,
}

/// Resolve input references into edges, then look for cycles
fn link(spec: &PipelineSpec, declared: &HashSet<String>) -> Linked {
    let mut graph = DiGraph::new();
    let mut name_to_index = HashMap::new();

    for (idx, node) in spec.nodes.iter().enumerate() {
        let n = graph.add_node(idx);
        name_to_index.entry(node.name.clone()).or_insert(n);
    }

    let mut errors = Vec::new();
    let mut parents = vec![None; spec.nodes.len()];

    for (idx, node) in spec.nodes.iter().enumerate() {
        let Some(parent) = node.parent() else {
            continue;
        };
        match name_to_index.get(parent) {
            Some(&p) => {
                parents[idx] = Some(graph[p]);
                graph.add_edge(p, NodeIndex::new(idx), ());
            }
            None if declared.contains(parent) => {}
            None => errors.push(ReconflowError::UnresolvedReference {
                node: node.name.clone(),
                reference: parent.to_string(),
            }),
        }
    }

    for cycle in find_cycles(&parents) {
        errors.push(ReconflowError::GraphCycle {
            nodes: cycle.iter().map(|&i| spec.nodes[i].name.clone()).collect(),
        });
    }

    Linked {
        graph,
        name_to_index,
        parents,
        errors,
    }
}

/// Follow each node's input chain; a chain that reaches a node already on
/// the current path closes a cycle. Nodes are marked done after each walk so
/// every cycle is reported exactly once, starting from its first-declared
/// member.
fn find_cycles(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut state = vec![Walk::Unvisited; parents.len()];
    let mut cycles = Vec::new();

    for start in 0..parents.len() {
        if state[start] != Walk::Unvisited {
            continue;
        }

        let mut path = Vec::new();
        let mut cur = Some(start);

        while let Some(idx) = cur {
            match state[idx] {
                Walk::Done => break,
                Walk::OnPath => {
                    if let Some(pos) = path.iter().position(|&p| p == idx) {
                        let mut members: Vec<usize> = path[pos..].to_vec();
                        members.reverse();
                        let first = members
                            .iter()
                            .enumerate()
                            .min_by_key(|&(_, m)| *m)
                            .map(|(i, _)| i)
                            .unwrap_or(0);
                        members.rotate_left(first);
                        cycles.push(members);
                    }
                    break;
                }
                Walk::Unvisited => {
                    state[idx] = Walk::OnPath;
                    path.push(idx);
                    cur = parents[idx];
                }
            }
        }

        for idx in path {
            state[idx] = Walk::Done;
        }
    }

    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Node, NodeRef, Software};

    fn make_test_spec(nodes: Vec<(&str, &str)>) -> PipelineSpec {
        PipelineSpec {
            name: "test".into(),
            description: None,
            space: "T1w".into(),
            atlases: vec![],
            anatomical: vec![],
            nodes: nodes
                .into_iter()
                .map(|(name, input)| Node {
                    name: name.into(),
                    software: Software::Mrtrix3,
                    action: "csd".into(),
                    output_suffix: name.into(),
                    input: NodeRef::from(input.to_string()),
                    parameters: Default::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_linear_chain() {
        let spec = make_test_spec(vec![("c", "b"), ("a", "qsiprep"), ("b", "a")]);

        let forest = Forest::build(&spec).unwrap();
        assert_eq!(forest.order_names(), vec!["a", "b", "c"]);
        assert_eq!(forest.ancestry(0), vec!["a", "b", "c"]);
        assert_eq!(forest.depth(0), 2);
    }

    #[test]
    fn test_forest_order_is_stable() {
        let spec = make_test_spec(vec![
            ("r1", "qsiprep"),
            ("r2", "qsiprep"),
            ("x", "r1"),
            ("y", "r2"),
            ("z", "r1"),
            ("w", "x"),
        ]);

        let forest = Forest::build(&spec).unwrap();
        assert_eq!(forest.order_names(), vec!["r1", "x", "w", "z", "r2", "y"]);
        assert_eq!(forest.tree_count(), 2);
        assert_eq!(forest.node_count(), spec.nodes.len());
        assert_eq!(forest.edge_count(), forest.node_count() - forest.tree_count());
        assert_eq!(forest.children("r1").unwrap(), vec!["x", "z"]);
    }

    #[test]
    fn test_unresolved_references_are_all_reported() {
        let spec = make_test_spec(vec![("a", "missing"), ("b", "qsiprep"), ("c", "ghost")]);

        let errors = Forest::build(&spec).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ReconflowError::UnresolvedReference { .. })));
    }

    #[test]
    fn test_each_cycle_reported_once() {
        let spec = make_test_spec(vec![
            ("a", "b"),
            ("b", "a"),
            ("self", "self"),
            ("tail", "a"),
            ("ok", "qsiprep"),
        ]);

        let errors = Forest::build(&spec).unwrap_err();
        let cycles: Vec<_> = errors
            .iter()
            .map(|e| match e {
                ReconflowError::GraphCycle { nodes } => nodes.clone(),
                other => panic!("unexpected error: {other:?}"),
            })
            .collect();

        assert_eq!(cycles, vec![vec!["a", "b"], vec!["self"]]);
    }

    #[test]
    fn test_partial_check_with_duplicate_names() {
        let spec = make_test_spec(vec![("recon", "qsiprep"), ("recon", "qsiprep"), ("trk", "missing_node")]);
        let declared = ["recon", "trk"].iter().map(|s| s.to_string()).collect();

        let errors = Forest::check_partial(&spec, &declared);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ReconflowError::UnresolvedReference { node, reference }
                if node == "trk" && reference == "missing_node"
        ));
    }

    #[test]
    fn test_partial_check_resolves_dropped_nodes() {
        // "fit" failed schema checks but is still a declared name
        let spec = make_test_spec(vec![("trk", "fit"), ("x", "y"), ("y", "x")]);
        let declared = ["fit", "trk", "x", "y"].iter().map(|s| s.to_string()).collect();

        let errors = Forest::check_partial(&spec, &declared);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ReconflowError::GraphCycle { .. }));
    }

    #[test]
    fn test_renderings() {
        let spec = make_test_spec(vec![("a", "qsiprep"), ("b", "a")]);
        let forest = Forest::build(&spec).unwrap();

        let mermaid = forest.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("n0 --> n1"));
        assert!(mermaid.contains("src --> n0"));

        let dot = forest.to_dot();
        assert!(dot.contains("\"qsiprep\" -> \"a\";"));
        assert!(dot.contains("\"a\" -> \"b\";"));

        let text = forest.to_text(&spec);
        assert!(text.contains("1. a (MRTrix3 csd) <- qsiprep"));
        assert!(text.contains("2.   b (MRTrix3 csd) <- a"));
    }

    #[test]
    fn test_dot_snapshot() {
        let spec = make_test_spec(vec![("a", "qsiprep"), ("b", "a"), ("c", "qsiprep")]);
        let forest = Forest::build(&spec).unwrap();

        insta::assert_snapshot!(forest.to_dot(), @r#"
        digraph pipeline {
            rankdir=TB;
            node [shape=box, style=rounded];
            "qsiprep" [shape=ellipse];

            "qsiprep" -> "a";
            "a" -> "b";
            "qsiprep" -> "c";
        }
        "#);
    }
}
