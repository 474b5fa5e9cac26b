use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::warn;

use crate::error::{MzError, Result};

/// Module dependency graph over build keys; edges run from a module to the
/// modules it references. References to keys outside the graph are ignored.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    modules: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module<I, S>(&mut self, key: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules
            .insert(key.into(), dependencies.into_iter().map(Into::into).collect());
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Dependency-first order, as indices into insertion order.
    ///
    /// A cycle is an error unless `tolerate_cycles` is set; then the closing
    /// edge is skipped and the order is whatever the traversal produced.
    pub fn topological_sort(&self, tolerate_cycles: bool) -> Result<Vec<usize>> {
        let mut result = Vec::with_capacity(self.modules.len());
        let mut visited = HashSet::new();
        let mut temp_visited = HashSet::new();

        for id in 0..self.modules.len() {
            if visited.contains(&id) {
                continue;
            }
            let mut cycle_path = Vec::new();
            if !self.visit(id, tolerate_cycles, &mut visited, &mut temp_visited, &mut result, &mut cycle_path) {
                return Err(MzError::CircularDependency { cycle: self.cycle_keys(cycle_path) });
            }
        }
        Ok(result)
    }

    fn visit(
        &self,
        id: usize,
        tolerate_cycles: bool,
        visited: &mut HashSet<usize>,
        temp_visited: &mut HashSet<usize>,
        result: &mut Vec<usize>,
        cycle_path: &mut Vec<usize>,
    ) -> bool {
        if temp_visited.contains(&id) {
            if tolerate_cycles {
                warn!(module = self.key(id), "skipping circular dependency edge");
                return true;
            }
            cycle_path.push(id);
            return false;
        }
        if visited.contains(&id) {
            return true;
        }

        temp_visited.insert(id);
        if let Some((_, dependencies)) = self.modules.get_index(id) {
            for dep in dependencies {
                let Some(dep_id) = self.modules.get_index_of(dep) else { continue };
                if !self.visit(dep_id, tolerate_cycles, visited, temp_visited, result, cycle_path) {
                    cycle_path.push(id);
                    return false;
                }
            }
        }
        temp_visited.remove(&id);
        visited.insert(id);
        result.push(id);
        true
    }

    fn key(&self, id: usize) -> &str {
        self.modules.get_index(id).map_or("", |(key, _)| key.as_str())
    }

    /// The unwound DFS path, trimmed to the cycle itself: `a -> b -> a`.
    fn cycle_keys(&self, mut path: Vec<usize>) -> Vec<String> {
        path.reverse();
        let start = path
            .last()
            .and_then(|closing| path.iter().position(|id| id == closing))
            .unwrap_or(0);
        path[start..].iter().map(|&id| self.key(id).to_string()).collect()
    }
}
