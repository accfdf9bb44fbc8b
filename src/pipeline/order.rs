//! Global execution order.
//!
//! The merged dependency tree is flattened level by level. Within a level,
//! modules with fewer copy-needed inputs go first, ties keep tree order. The
//! flattened sequence is then checked against every tap constraint with a
//! rank-preserving topological pass: a valid sequence comes back unchanged,
//! an invalid one is repaired with the least movement, and a genuine cycle
//! is reported.

use crate::pipeline::dependency_tree::DependencyTree;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::ModuleId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Breadth-first flatten of `tree`.
pub fn flatten(tree: &DependencyTree, copy_counts: &HashMap<ModuleId, usize>) -> Vec<ModuleId> {
    let mut order = Vec::with_capacity(tree.module_count());
    for mut level in tree.levels() {
        level.sort_by_key(|m| copy_counts.get(m).copied().unwrap_or(0));
        order.extend(level);
    }
    order
}

/// Reorder `order` so every module follows the modules it depends on.
///
/// `after` maps a module to the modules that must run before it.
pub fn normalize(
    order: &[ModuleId],
    after: &HashMap<ModuleId, Vec<ModuleId>>,
) -> PipelineResult<Vec<ModuleId>> {
    let rank: HashMap<ModuleId, usize> = order.iter().enumerate().map(|(i, &m)| (m, i)).collect();

    let mut in_degree = vec![0usize; order.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); order.len()];

    for (&module, deps) in after {
        let Some(&to) = rank.get(&module) else {
            continue;
        };
        for dep in deps {
            if let Some(&from) = rank.get(dep) {
                if from == to {
                    return Err(PipelineError::GraphCycle(format!(
                        "module {} depends on itself",
                        module
                    )));
                }
                successors[from].push(to);
                in_degree[to] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..order.len())
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut result = Vec::with_capacity(order.len());

    while let Some(Reverse(i)) = ready.pop() {
        result.push(order[i]);
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if result.len() != order.len() {
        let mut stuck: Vec<ModuleId> = (0..order.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| order[i])
            .collect();
        stuck.sort();
        let names: Vec<String> = stuck.iter().map(|m| m.to_string()).collect();
        return Err(PipelineError::GraphCycle(format!(
            "modules {} wait on each other across streams",
            names.join(", ")
        )));
    }

    Ok(result)
}
