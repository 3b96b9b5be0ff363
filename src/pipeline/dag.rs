// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Artifact graph for experiment trees
//!
//! Builds the whole-experiment graph of artifacts, checks it for cycles up
//! front and renders it as text, DOT or Mermaid.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::BTreeMap;

use super::definition::{is_non_materializing, Experiment};
use crate::errors::ExpflowError;

/// Graph of artifacts connected by stage chains
pub struct ExperimentGraph {
    graph: DiGraph<String, Vec<String>>,
    name_to_index: BTreeMap<String, NodeIndex>,
}

impl ExperimentGraph {
    /// Build and validate the artifact graph of an experiment
    pub fn build(experiment: &Experiment) -> Result<Self, ExpflowError> {
        let mut builder = Self {
            graph: DiGraph::new(),
            name_to_index: BTreeMap::new(),
        };

        for input in &experiment.inputs {
            builder.node(input);
        }

        for (artifact, edges) in &experiment.tree {
            let from = builder.node(artifact);
            for edge in edges {
                let to = builder.node(&edge.output);
                builder.graph.add_edge(from, to, edge.stages.clone());
            }
        }

        builder.validate_acyclic()?;

        Ok(builder)
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.name_to_index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.name_to_index.insert(name.to_string(), idx);
        idx
    }

    fn validate_acyclic(&self) -> Result<(), ExpflowError> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(ExpflowError::CircularDependency {
                artifacts: self.find_cycle_members(cycle.node_id()),
            }),
        }
    }

    /// Walk forward from `start` until the walk returns to it
    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        let mut path = vec![start];
        if self.walk_back_to(start, start, &mut path) {
            path.iter().map(|n| self.graph[*n].clone()).collect()
        } else {
            vec![self.graph[start].clone()]
        }
    }

    fn walk_back_to(&self, current: NodeIndex, target: NodeIndex, path: &mut Vec<NodeIndex>) -> bool {
        for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
            if next == target {
                path.push(next);
                return true;
            }
            if path.contains(&next) {
                continue;
            }
            path.push(next);
            if self.walk_back_to(next, target, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Artifact names in dependency order
    pub fn topological_order(&self) -> Result<Vec<String>, ExpflowError> {
        toposort(&self.graph, None)
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n].clone()).collect())
            .map_err(|cycle| ExpflowError::CircularDependency {
                artifacts: self.find_cycle_members(cycle.node_id()),
            })
    }

    /// Artifacts with no outgoing edges
    pub fn leaves(&self) -> Vec<String> {
        self.name_to_index
            .iter()
            .filter(|(_, idx)| {
                self.graph
                    .neighbors_directed(**idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Artifacts that feed `artifact` directly
    pub fn producers(&self, artifact: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(artifact)?;
        Some(
            self.graph
                .neighbors_directed(*node, Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
        )
    }

    /// Whether `to` can be derived from `from`
    pub fn derives(&self, from: &str, to: &str) -> bool {
        let (Some(a), Some(b)) = (self.name_to_index.get(from), self.name_to_index.get(to)) else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, *a, *b, None)
    }

    /// Generate Mermaid diagram of the graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (i, (name, _)) in self.name_to_index.iter().enumerate() {
            let shape = if is_non_materializing(name) {
                format!("    n{}(({}))\n", i, name)
            } else {
                format!("    n{}[\"{}\"]\n", i, name)
            };
            out.push_str(&shape);
        }

        let ids: BTreeMap<NodeIndex, usize> = self
            .name_to_index
            .values()
            .enumerate()
            .map(|(i, idx)| (*idx, i))
            .collect();

        for edge in self.graph.edge_indices() {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let label = self.graph[edge].join(", ");
            if label.is_empty() {
                out.push_str(&format!("    n{} --> n{}\n", ids[&from], ids[&to]));
            } else {
                out.push_str(&format!("    n{} -->|{}| n{}\n", ids[&from], label, ids[&to]));
            }
        }

        out
    }

    /// Generate DOT diagram of the graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph experiment {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                self.graph[from],
                self.graph[to],
                self.graph[edge].join(", ")
            ));
        }

        for (name, node) in &self.name_to_index {
            if is_non_materializing(name) {
                out.push_str(&format!("    \"{}\" [style=dashed];\n", name));
            } else if self.graph.neighbors_undirected(*node).next().is_none() {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text listing of every edge in dependency order
    pub fn to_text(&self) -> Result<String, ExpflowError> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for name in order {
            let node = self.name_to_index[&name];
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                let stages = if edge.weight().is_empty() {
                    "(no stages)".to_string()
                } else {
                    edge.weight().join(" -> ")
                };
                out.push_str(&format!("{} --[{}]--> {}\n", name, stages, self.graph[edge.target()]));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment(yaml: &str) -> Experiment {
        Experiment::from_yaml(yaml).unwrap()
    }

    const BRANCHING: &str = r#"
inputs: [A]
tree:
  A:
    - stages: [s1]
      output: B
  B:
    - stages: [c1]
      output: C
    - stages: [d1]
      output: D
"#;

    #[test]
    fn test_branching_graph() {
        let graph = ExperimentGraph::build(&experiment(BRANCHING)).unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order[0], "A");
        assert_eq!(order[1], "B");
        assert_eq!(graph.leaves(), vec!["C", "D"]);
        assert_eq!(graph.producers("C").unwrap(), vec!["B"]);
        assert!(graph.derives("A", "D"));
        assert!(!graph.derives("C", "A"));
    }

    #[test]
    fn test_cycle_detected_with_members() {
        let result = ExperimentGraph::build(&experiment(
            r#"
inputs: [A]
tree:
  A:
    - stages: [s]
      output: B
  B:
    - stages: [t]
      output: A
"#,
        ));

        match result {
            Err(ExpflowError::CircularDependency { artifacts }) => {
                assert_eq!(artifacts.first(), artifacts.last());
                assert!(artifacts.contains(&"A".to_string()));
                assert!(artifacts.contains(&"B".to_string()));
            }
            _ => panic!("Expected CircularDependency"),
        }
    }

    #[test]
    fn test_renderings() {
        let graph = ExperimentGraph::build(&experiment(BRANCHING)).unwrap();

        let mermaid = graph.to_mermaid();
        assert!(mermaid.starts_with("graph TD"));
        assert!(mermaid.contains("-->|c1|"));

        let dot = graph.to_dot();
        assert!(dot.contains("\"A\" -> \"B\" [label=\"s1\"];"));

        let text = graph.to_text().unwrap();
        assert!(text.contains("A --[s1]--> B"));
        assert!(text.contains("B --[d1]--> D"));
    }
}
