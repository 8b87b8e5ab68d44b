// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dependency-graph resolution for agent definitions.
//!
//! Builds a graph from each [`AgentDefinition`]'s `dependencies` list,
//! validates that every referenced name exists and that its declared
//! version satisfies the constraint, detects cycles via a three-color DFS,
//! and produces a deterministic topological order (ties broken by name,
//! ascending) for load order.

use std::collections::HashMap;

use thiserror::Error;

use crate::definition::AgentDefinition;
use crate::version::VersionConstraint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency '{from}' -> '{to}' refers to an agent that does not exist")]
    MissingDependency { from: String, to: String },
    #[error("version_mismatch({from}, {to}, {constraint}, {actual})")]
    VersionMismatch {
        from: String,
        to: String,
        constraint: String,
        actual: String,
    },
    #[error("dependency cycle detected: {0}")]
    Cycle(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A resolved dependency graph over a set of agent definitions.
pub struct DependencyGraph<'a> {
    defs: HashMap<String, &'a AgentDefinition>,
    /// Adjacency list: agent name -> names of agents it depends on.
    edges: HashMap<String, Vec<String>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build a graph from `definitions`, validating that every dependency
    /// name exists and that the depended-on version satisfies its
    /// constraint. Does not itself detect cycles — call [`Self::resolve`]
    /// for that.
    pub fn build(definitions: &'a [AgentDefinition]) -> Result<Self, GraphError> {
        let defs: HashMap<String, &AgentDefinition> =
            definitions.iter().map(|d| (d.name.clone(), d)).collect();

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for def in definitions {
            let mut deps = Vec::with_capacity(def.dependencies.len());
            for dep in &def.dependencies {
                let target = defs.get(dep.name.as_str()).ok_or_else(|| GraphError::MissingDependency {
                    from: def.name.clone(),
                    to: dep.name.clone(),
                })?;

                let constraint = VersionConstraint::parse(&dep.constraint)
                    .expect("constraint syntax already validated at definition parse time");
                if !constraint.matches(&target.version) {
                    return Err(GraphError::VersionMismatch {
                        from: def.name.clone(),
                        to: dep.name.clone(),
                        constraint: dep.constraint.clone(),
                        actual: target.version.to_string(),
                    });
                }
                deps.push(dep.name.clone());
            }
            deps.sort();
            edges.insert(def.name.clone(), deps);
        }

        Ok(Self { defs, edges })
    }

    /// Names of the agents directly depended on by `name`.
    pub fn direct_dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All transitive dependencies of `name`, in topological (dependency-first)
    /// order, deduplicated.
    pub fn transitive_dependencies(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let order = self.topological_order()?;
        let mut reachable = std::collections::HashSet::new();
        let mut stack = self.edges.get(name).cloned().unwrap_or_default();
        while let Some(n) = stack.pop() {
            if reachable.insert(n.clone()) {
                stack.extend(self.edges.get(&n).cloned().unwrap_or_default());
            }
        }
        Ok(order.into_iter().filter(|n| reachable.contains(n)).collect())
    }

    /// Detect cycles and, if none exist, return a deterministic topological
    /// order (dependencies before dependents, ties broken by name ascending).
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut colors: HashMap<&str, Color> =
            self.defs.keys().map(|k| (k.as_str(), Color::White)).collect();
        let mut order = Vec::with_capacity(self.defs.len());

        let mut names: Vec<&str> = self.defs.keys().map(String::as_str).collect();
        names.sort();

        for name in names {
            if colors[name] == Color::White {
                let mut path = Vec::new();
                self.visit(name, &mut colors, &mut order, &mut path)?;
            }
        }
        Ok(order)
    }

    fn visit<'n>(
        &'n self,
        name: &'n str,
        colors: &mut HashMap<&'n str, Color>,
        order: &mut Vec<String>,
        path: &mut Vec<&'n str>,
    ) -> Result<(), GraphError> {
        colors.insert(name, Color::Gray);
        path.push(name);

        let mut deps: Vec<&str> = self
            .edges
            .get(name)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default();
        deps.sort();

        for dep in deps {
            match colors.get(dep).copied().unwrap_or(Color::White) {
                Color::White => self.visit(dep, colors, order, path)?,
                Color::Gray => {
                    let cycle_start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[cycle_start..].to_vec();
                    cycle.push(dep);
                    return Err(GraphError::Cycle(cycle.join(" -> ")));
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(name, Color::Black);
        order.push(name.to_string());
        Ok(())
    }

    /// Resolve and validate the whole graph: cycle detection plus a final
    /// topological order usable as a load plan.
    pub fn resolve(&self) -> Result<Vec<String>, GraphError> {
        self.topological_order()
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.defs.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{parse_definition, AgentKind, AgentSource};
    use std::path::PathBuf;

    fn def(name: &str, version: &str, deps: &[(&str, &str)]) -> AgentDefinition {
        let dep_yaml: String = deps
            .iter()
            .map(|(n, c)| format!("  - name: {n}\n    version: \"{c}\"\n"))
            .collect();
        let deps_block = if deps.is_empty() {
            String::new()
        } else {
            format!("dependencies:\n{dep_yaml}")
        };
        let raw = format!("---\ndescription: d\nversion: {version}\n{deps_block}---\n\nbody");
        parse_definition(&raw, name, &PathBuf::from(format!("/tmp/{name}.md")), AgentSource::Project, AgentKind::Subagent)
            .unwrap()
    }

    #[test]
    fn builds_graph_with_satisfied_constraint() {
        let defs = vec![def("a", "1.0.0", &[("b", "^1.0.0")]), def("b", "1.2.0", &[])];
        let graph = DependencyGraph::build(&defs).unwrap();
        assert_eq!(graph.direct_dependencies("a"), &["b".to_string()]);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let defs = vec![def("a", "1.0.0", &[("ghost", "^1.0.0")])];
        let err = DependencyGraph::build(&defs).unwrap_err();
        assert!(matches!(err, GraphError::MissingDependency { .. }));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let defs = vec![def("a", "1.0.0", &[("b", "^2.0.0")]), def("b", "1.0.0", &[])];
        let err = DependencyGraph::build(&defs).unwrap_err();
        assert!(matches!(err, GraphError::VersionMismatch { .. }));
    }

    #[test]
    fn topological_order_respects_dependency_direction() {
        let defs = vec![def("a", "1.0.0", &[("b", "^1.0.0")]), def("b", "1.0.0", &[])];
        let graph = DependencyGraph::build(&defs).unwrap();
        let order = graph.resolve().unwrap();
        let a_pos = order.iter().position(|n| n == "a").unwrap();
        let b_pos = order.iter().position(|n| n == "b").unwrap();
        assert!(b_pos < a_pos);
    }

    #[test]
    fn topological_order_breaks_ties_by_name() {
        let defs = vec![def("z", "1.0.0", &[]), def("a", "1.0.0", &[]), def("m", "1.0.0", &[])];
        let graph = DependencyGraph::build(&defs).unwrap();
        let order = graph.resolve().unwrap();
        assert_eq!(order, vec!["a".to_string(), "m".to_string(), "z".to_string()]);
    }

    #[test]
    fn direct_cycle_is_detected() {
        let defs = vec![def("a", "1.0.0", &[("b", "^1.0.0")]), def("b", "1.0.0", &[("a", "^1.0.0")])];
        let graph = DependencyGraph::build(&defs).unwrap();
        let err = graph.resolve().unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert!(path.contains("a"));
                assert!(path.contains("b"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn longer_cycle_is_detected() {
        let defs = vec![
            def("a", "1.0.0", &[("b", "^1.0.0")]),
            def("b", "1.0.0", &[("c", "^1.0.0")]),
            def("c", "1.0.0", &[("a", "^1.0.0")]),
        ];
        let graph = DependencyGraph::build(&defs).unwrap();
        assert!(matches!(graph.resolve(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn transitive_dependencies_includes_indirect() {
        let defs = vec![
            def("a", "1.0.0", &[("b", "^1.0.0")]),
            def("b", "1.0.0", &[("c", "^1.0.0")]),
            def("c", "1.0.0", &[]),
        ];
        let graph = DependencyGraph::build(&defs).unwrap();
        let trans = graph.transitive_dependencies("a").unwrap();
        assert_eq!(trans, vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn no_dependencies_yields_empty_transitive_set() {
        let defs = vec![def("a", "1.0.0", &[])];
        let graph = DependencyGraph::build(&defs).unwrap();
        assert!(graph.transitive_dependencies("a").unwrap().is_empty());
    }
}
