// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::path::Path;
use std::collections::{HashMap, HashSet};

/// The dependency edges of the formula subsystem. Edges are keyed by path,
/// not by node, so inputs may name paths that do not exist yet and removal
/// of an input file leaves its dependents discoverable.
pub struct DependencyGraph {
    // input path -> formulas that read it
    dependents: HashMap<Path, HashSet<Path>>,
    // formula path -> the inputs it reads
    inputs: HashMap<Path, Vec<Path>>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph {
            dependents: HashMap::new(),
            inputs: HashMap::new(),
        }
    }

    pub fn add_formula(&mut self, formula: &Path, inputs: &[Path]) {
        for input in inputs {
            self.dependents
                .entry(input.clone())
                .or_insert_with(HashSet::new)
                .insert(formula.clone());
        }
        self.inputs.insert(formula.clone(), inputs.to_vec());
    }

    pub fn remove_formula(&mut self, formula: &Path) {
        if let Some(inputs) = self.inputs.remove(formula) {
            for input in &inputs {
                if let Some(dependents) = self.dependents.get_mut(input) {
                    dependents.remove(formula);
                    if dependents.is_empty() {
                        self.dependents.remove(input);
                    }
                }
            }
        }
    }

    /// Whether installing a formula at |formula| reading |inputs| would close
    /// a dependency cycle. Walks the would-be input edges through the inputs
    /// of every formula already registered.
    pub fn would_cycle(&self, formula: &Path, inputs: &[Path]) -> bool {
        let mut visited: HashSet<Path> = HashSet::new();
        let mut worklist: Vec<Path> = inputs.to_vec();
        while let Some(path) = worklist.pop() {
            if path == *formula {
                return true;
            }
            if !visited.insert(path.clone()) {
                continue;
            }
            if let Some(next) = self.inputs.get(&path) {
                worklist.extend(next.iter().cloned());
            }
        }
        false
    }

    /// All formulas whose value may have changed after writing |written|, in
    /// topological order: a formula appears only after every affected formula
    /// it reads.
    pub fn transitive_dependents(&self, written: &HashSet<Path>) -> Vec<Path> {
        let mut affected: HashSet<Path> = HashSet::new();
        let mut processed: HashSet<Path> = HashSet::new();
        let mut worklist: Vec<Path> = written.iter().cloned().collect();
        while let Some(path) = worklist.pop() {
            if !processed.insert(path.clone()) {
                continue;
            }
            if let Some(dependents) = self.dependents.get(&path) {
                for dependent in dependents {
                    affected.insert(dependent.clone());
                    worklist.push(dependent.clone());
                }
            }
        }

        let mut remaining: Vec<Path> = affected.iter().cloned().collect();
        remaining.sort();
        let mut pending = affected;
        let mut order = Vec::new();
        while !remaining.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for path in remaining.drain(..) {
                let ready = match self.inputs.get(&path) {
                    Some(inputs) => inputs.iter().all(|input| !pending.contains(input)),
                    None => true,
                };
                if ready {
                    pending.remove(&path);
                    order.push(path);
                    progressed = true;
                } else {
                    deferred.push(path);
                }
            }
            if !progressed {
                // Cycles are rejected at formula creation time.
                debug_assert!(deferred.is_empty());
                deferred.sort();
                order.extend(deferred);
                break;
            }
            remaining = deferred;
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathBuilder;

    fn p(path: &str) -> Path {
        PathBuilder::new(path).unwrap().finish_path().unwrap()
    }

    fn written(paths: &[&str]) -> HashSet<Path> {
        paths.iter().map(|s| p(s)).collect()
    }

    #[test]
    fn test_direct_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_formula(&p("/result"), &[p("/a"), p("/b")]);
        assert_eq!(graph.transitive_dependents(&written(&["/a"])), vec![p("/result")]);
        assert_eq!(graph.transitive_dependents(&written(&["/b"])), vec![p("/result")]);
        assert!(graph.transitive_dependents(&written(&["/c"])).is_empty());
    }

    #[test]
    fn test_chained_dependents_are_topological() {
        let mut graph = DependencyGraph::new();
        // Insert the deeper formula first so hash order cannot accidentally
        // produce the right answer.
        graph.add_formula(&p("/c"), &[p("/b")]);
        graph.add_formula(&p("/b"), &[p("/a")]);
        assert_eq!(
            graph.transitive_dependents(&written(&["/a"])),
            vec![p("/b"), p("/c")]
        );
    }

    #[test]
    fn test_diamond_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_formula(&p("/d"), &[p("/b"), p("/c")]);
        graph.add_formula(&p("/b"), &[p("/a")]);
        graph.add_formula(&p("/c"), &[p("/a")]);
        let order = graph.transitive_dependents(&written(&["/a"]));
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], p("/d"));
    }

    #[test]
    fn test_remove_formula_drops_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_formula(&p("/result"), &[p("/a")]);
        graph.remove_formula(&p("/result"));
        assert!(graph.transitive_dependents(&written(&["/a"])).is_empty());
    }

    #[test]
    fn test_cycle_detection_self() {
        let graph = DependencyGraph::new();
        assert!(graph.would_cycle(&p("/a"), &[p("/a")]));
    }

    #[test]
    fn test_cycle_detection_indirect() {
        let mut graph = DependencyGraph::new();
        graph.add_formula(&p("/b"), &[p("/a")]);
        graph.add_formula(&p("/c"), &[p("/b")]);
        assert!(graph.would_cycle(&p("/a"), &[p("/c")]));
        assert!(!graph.would_cycle(&p("/d"), &[p("/c")]));
    }

    #[test]
    fn test_cycle_detection_through_missing_input() {
        let mut graph = DependencyGraph::new();
        // /g reads /f before anything exists at /f.
        graph.add_formula(&p("/g"), &[p("/f")]);
        assert!(graph.would_cycle(&p("/f"), &[p("/g")]));
    }
}
