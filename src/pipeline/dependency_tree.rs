//! Ordering trees for event streams.
//!
//! A tree is an arena of depth levels (`DepNode`) owning links (`DepLink`).
//! Each link names one module, or is a filler that only holds depth, and may
//! own the next level below it. A module placed at depth `d` runs after every
//! module at a depth below `d`.
//!
//! One tree is built per stream from its tap requests, then all trees are
//! folded into a single destination tree whose breadth-first flatten is the
//! global execution order.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{LinkId, ModuleId, StreamKey, TapPoint, TreeNodeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone)]
struct DepNode {
    depth: u32,
    /// Link owning this level. `INVALID` for the root.
    parent_link: LinkId,
    links: Vec<LinkId>,
}

#[derive(Debug, Clone)]
struct DepLink {
    /// `None` for filler links.
    module: Option<ModuleId>,
    owner: TreeNodeId,
    next: TreeNodeId,
}

/// Arena-backed dependency tree.
#[derive(Debug, Clone)]
pub struct DependencyTree {
    nodes: Vec<DepNode>,
    links: Vec<DepLink>,
    index: HashMap<ModuleId, LinkId>,
    fillers: usize,
}

impl Default for DependencyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyTree {
    pub const ROOT: TreeNodeId = TreeNodeId(0);

    /// Empty tree with a root level at depth 0.
    pub fn new() -> Self {
        Self {
            nodes: vec![DepNode {
                depth: 0,
                parent_link: LinkId::INVALID,
                links: Vec::new(),
            }],
            links: Vec::new(),
            index: HashMap::new(),
            fillers: 0,
        }
    }

    /// Build the tree of one stream.
    ///
    /// `users` pairs every consumer with its tap point on this stream. Users
    /// that cannot be reached from the producer form a tap cycle.
    pub fn build_for_stream(
        key: StreamKey,
        users: &[(ModuleId, TapPoint)],
    ) -> PipelineResult<Self> {
        let mut tree = Self::new();
        let root_link = tree.push_link(Self::ROOT, Some(key.producer));

        let mut placed = 0usize;
        let mut queue = VecDeque::from([(root_link, key.producer)]);

        while let Some((link, check)) = queue.pop_front() {
            let mut children: Vec<ModuleId> = users
                .iter()
                .filter(|(_, tap)| tap.module(key.producer) == check)
                .map(|(id, _)| *id)
                .collect();
            if children.is_empty() {
                continue;
            }
            children.sort();

            let next = tree.next_level(link);
            for child in children {
                if tree.index.contains_key(&child) {
                    return Err(PipelineError::GraphCycle(format!(
                        "module {} reached twice in stream {}",
                        child, key
                    )));
                }
                let child_link = tree.push_link(next, Some(child));
                queue.push_back((child_link, child));
                placed += 1;
            }
        }

        if placed != users.len() {
            let mut stranded: Vec<ModuleId> = users
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !tree.index.contains_key(id))
                .collect();
            stranded.sort();
            return Err(PipelineError::GraphCycle(format!(
                "stream {}: tap points of modules {:?} form a cycle and never reach the producer",
                key, stranded
            )));
        }

        Ok(tree)
    }

    pub fn contains(&self, module: ModuleId) -> bool {
        self.index.contains_key(&module)
    }

    /// Depth of `module`, if present.
    pub fn depth_of(&self, module: ModuleId) -> Option<u32> {
        self.index
            .get(&module)
            .map(|l| self.nodes[self.links[l.index()].owner.index()].depth)
    }

    /// Number of filler links inserted by merges.
    pub fn filler_count(&self) -> usize {
        self.fillers
    }

    pub fn module_count(&self) -> usize {
        self.index.len()
    }

    fn push_link(&mut self, node: TreeNodeId, module: Option<ModuleId>) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(DepLink {
            module,
            owner: node,
            next: TreeNodeId::INVALID,
        });
        self.nodes[node.index()].links.push(id);
        if let Some(m) = module {
            self.index.insert(m, id);
        }
        id
    }

    /// Level below `link`, created on first use.
    fn next_level(&mut self, link: LinkId) -> TreeNodeId {
        let existing = self.links[link.index()].next;
        if existing.is_valid() {
            return existing;
        }
        let depth = self.nodes[self.links[link.index()].owner.index()].depth + 1;
        let id = TreeNodeId(self.nodes.len() as u32);
        self.nodes.push(DepNode {
            depth,
            parent_link: link,
            links: Vec::new(),
        });
        self.links[link.index()].next = id;
        id
    }

    fn sort_links(&mut self, node: TreeNodeId) {
        let links = &self.links;
        self.nodes[node.index()]
            .links
            .sort_by_key(|l| links[l.index()].module);
    }

    /// Modules of the links above `link`, nearest first.
    fn ancestors(&self, link: LinkId) -> Vec<ModuleId> {
        let mut out = Vec::new();
        let mut current = self.nodes[self.links[link.index()].owner.index()].parent_link;
        while current.is_valid() {
            let l = &self.links[current.index()];
            if let Some(m) = l.module {
                out.push(m);
            }
            current = self.nodes[l.owner.index()].parent_link;
        }
        out
    }

    /// Modules anywhere below `link`.
    fn descendants(&self, link: LinkId) -> Vec<ModuleId> {
        let mut out = Vec::new();
        let mut stack = vec![self.links[link.index()].next];
        while let Some(node) = stack.pop() {
            if !node.is_valid() {
                continue;
            }
            for &l in &self.nodes[node.index()].links {
                let l = &self.links[l.index()];
                if let Some(m) = l.module {
                    out.push(m);
                }
                stack.push(l.next);
            }
        }
        out
    }

    fn shift_depth(&mut self, node: TreeNodeId, delta: u32) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !n.is_valid() {
                continue;
            }
            self.nodes[n.index()].depth += delta;
            for i in 0..self.nodes[n.index()].links.len() {
                let l = self.nodes[n.index()].links[i];
                stack.push(self.links[l.index()].next);
            }
        }
    }

    /// Move `module` (and everything below it) down to `target_depth`.
    ///
    /// Its current link turns into a filler heading a chain of filler levels;
    /// the module is re-added at the bottom of the chain and keeps its subtree.
    fn push_down(&mut self, module: ModuleId, target_depth: u32) {
        let Some(&link) = self.index.get(&module) else {
            return;
        };
        let depth = self.nodes[self.links[link.index()].owner.index()].depth;
        if target_depth <= depth {
            return;
        }

        let subtree = self.links[link.index()].next;
        self.links[link.index()].module = None;
        self.links[link.index()].next = TreeNodeId::INVALID;
        self.index.remove(&module);
        self.fillers += 1;

        let mut tail = link;
        for _ in depth + 1..target_depth {
            let level = self.next_level(tail);
            tail = self.push_link(level, None);
            self.fillers += 1;
        }
        let level = self.next_level(tail);
        let moved = self.push_link(level, Some(module));

        if subtree.is_valid() {
            self.links[moved.index()].next = subtree;
            self.nodes[subtree.index()].parent_link = moved;
            self.shift_depth(subtree, target_depth - depth);
        }
    }

    /// Fold `src` into this tree.
    pub fn merge(&mut self, src: &DependencyTree) -> PipelineResult<()> {
        let mut queue = VecDeque::from([Self::ROOT]);

        while let Some(src_node) = queue.pop_front() {
            let node = &src.nodes[src_node.index()];
            let src_parent = if node.parent_link.is_valid() {
                src.links[node.parent_link.index()].module
            } else {
                None
            };

            for &src_link in &node.links {
                let l = &src.links[src_link.index()];
                if l.next.is_valid() {
                    queue.push_back(l.next);
                }
                let Some(module) = l.module else {
                    continue;
                };

                match self.index.get(&module).copied() {
                    Some(existing) => {
                        let ancestors: HashSet<ModuleId> =
                            self.ancestors(existing).into_iter().collect();
                        if let Some(dep) = src
                            .descendants(src_link)
                            .into_iter()
                            .find(|d| ancestors.contains(d))
                        {
                            return Err(PipelineError::GraphCycle(format!(
                                "module {} must run after {}, which already runs before it",
                                dep, module
                            )));
                        }

                        let Some(parent) = src_parent else {
                            continue;
                        };
                        let (Some(parent_depth), Some(depth)) =
                            (self.depth_of(parent), self.depth_of(module))
                        else {
                            continue;
                        };
                        if parent_depth >= depth {
                            self.push_down(module, parent_depth + 1);
                        }
                    }
                    None => match src_parent {
                        None => {
                            self.push_link(Self::ROOT, Some(module));
                            self.sort_links(Self::ROOT);
                        }
                        Some(parent) => {
                            let Some(&parent_link) = self.index.get(&parent) else {
                                return Err(PipelineError::GraphCycle(format!(
                                    "module {} depends on {}, which is not yet placed",
                                    module, parent
                                )));
                            };
                            let level = self.next_level(parent_link);
                            self.push_link(level, Some(module));
                            self.sort_links(level);
                        }
                    },
                }
            }
        }

        Ok(())
    }

    /// Modules level by level, fillers skipped, each level in link order.
    pub fn levels(&self) -> Vec<Vec<ModuleId>> {
        let mut levels = Vec::new();
        let mut current = vec![Self::ROOT];

        while !current.is_empty() {
            let mut level = Vec::new();
            let mut next = Vec::new();
            for node in &current {
                for &l in &self.nodes[node.index()].links {
                    let link = &self.links[l.index()];
                    if let Some(m) = link.module {
                        level.push(m);
                    }
                    if link.next.is_valid() {
                        next.push(link.next);
                    }
                }
            }
            levels.push(level);
            current = next;
        }

        levels
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, node: TreeNodeId) -> fmt::Result {
        let n = &self.nodes[node.index()];
        for &l in &n.links {
            let link = &self.links[l.index()];
            let indent = "  ".repeat(n.depth as usize);
            match link.module {
                Some(m) => writeln!(f, "{}{} (depth {})", indent, m, n.depth)?,
                None => writeln!(f, "{}- (depth {})", indent, n.depth)?,
            }
            if link.next.is_valid() {
                self.fmt_node(f, link.next)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, Self::ROOT)
    }
}

/// A stream's tree plus what the merge driver needs to schedule it.
#[derive(Debug, Clone)]
pub struct StreamTree {
    pub key: StreamKey,
    pub from_processor: bool,
    pub tree: DependencyTree,
}

/// Fold every stream tree into one.
///
/// Source streams go first. Processor streams wait until their producer has
/// been placed; a full pass over the waiting streams without progress means
/// their producers can never be placed.
pub fn merge_all(trees: &[StreamTree]) -> PipelineResult<DependencyTree> {
    let mut dest = DependencyTree::new();

    for st in trees.iter().filter(|t| !t.from_processor) {
        dest.merge(&st.tree)?;
    }

    let mut pending: VecDeque<&StreamTree> = trees.iter().filter(|t| t.from_processor).collect();
    while !pending.is_empty() {
        let mut progressed = false;
        for _ in 0..pending.len() {
            let Some(st) = pending.pop_front() else {
                break;
            };
            if dest.contains(st.key.producer) {
                dest.merge(&st.tree)?;
                progressed = true;
            } else {
                pending.push_back(st);
            }
        }

        if !progressed {
            let mut stuck: Vec<String> = pending.iter().map(|st| st.key.to_string()).collect();
            stuck.sort();
            stuck.dedup();
            return Err(PipelineError::GraphCycle(format!(
                "streams {} come from processors that are never reached from any source",
                stuck.join(", ")
            )));
        }
    }

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::EventTypeId;

    fn key(p: u16) -> StreamKey {
        StreamKey::new(ModuleId(p), EventTypeId(1))
    }

    fn m(id: u16) -> ModuleId {
        ModuleId(id)
    }

    fn ids(levels: Vec<Vec<ModuleId>>) -> Vec<Vec<u16>> {
        levels
            .into_iter()
            .map(|l| l.into_iter().map(|m| m.0).collect())
            .collect()
    }

    #[test]
    fn test_build_simple_stream() {
        let users = [
            (m(3), TapPoint::Source),
            (m(2), TapPoint::Source),
            (m(4), TapPoint::After(m(2))),
        ];
        let tree = DependencyTree::build_for_stream(key(1), &users).unwrap();
        assert_eq!(ids(tree.levels()), vec![vec![1], vec![2, 3], vec![4]]);
        assert_eq!(tree.depth_of(m(4)), Some(2));
    }

    #[test]
    fn test_build_detects_tap_loop() {
        let users = [
            (m(2), TapPoint::Source),
            (m(3), TapPoint::After(m(4))),
            (m(4), TapPoint::After(m(3))),
        ];
        let err = DependencyTree::build_for_stream(key(1), &users).unwrap_err();
        assert!(matches!(err, PipelineError::GraphCycle(_)));
        assert!(err.to_string().contains("ModuleId(3)"));
    }

    #[test]
    fn test_merge_disjoint_sources() {
        let a = DependencyTree::build_for_stream(key(1), &[(m(5), TapPoint::Source)]).unwrap();
        let b = DependencyTree::build_for_stream(key(2), &[(m(6), TapPoint::Source)]).unwrap();
        let mut dest = DependencyTree::new();
        dest.merge(&a).unwrap();
        dest.merge(&b).unwrap();
        assert_eq!(ids(dest.levels()), vec![vec![1, 2], vec![5, 6]]);
    }

    #[test]
    fn test_merge_pushes_down_with_filler() {
        // Stream 1: 1 -> {3, 4}. Stream 3 (from processor 3): 3 -> 4.
        let s1 = DependencyTree::build_for_stream(
            key(1),
            &[(m(3), TapPoint::Source), (m(4), TapPoint::Source)],
        )
        .unwrap();
        let s3 = DependencyTree::build_for_stream(key(3), &[(m(4), TapPoint::Source)]).unwrap();

        let mut dest = DependencyTree::new();
        dest.merge(&s1).unwrap();
        dest.merge(&s3).unwrap();

        assert_eq!(dest.depth_of(m(3)), Some(1));
        assert_eq!(dest.depth_of(m(4)), Some(2));
        assert_eq!(dest.filler_count(), 1);
        assert_eq!(ids(dest.levels()), vec![vec![1], vec![3], vec![4]]);
    }

    #[test]
    fn test_push_down_moves_subtree() {
        // Stream 1: 1 -> {2, 3}, 3 -> 5 (5 taps after 3). Stream 2: 2 -> 3.
        let s1 = DependencyTree::build_for_stream(
            key(1),
            &[
                (m(2), TapPoint::Source),
                (m(3), TapPoint::Source),
                (m(5), TapPoint::After(m(3))),
            ],
        )
        .unwrap();
        let s2 = DependencyTree::build_for_stream(key(2), &[(m(3), TapPoint::Source)]).unwrap();

        let mut dest = DependencyTree::new();
        dest.merge(&s1).unwrap();
        dest.merge(&s2).unwrap();

        assert_eq!(dest.depth_of(m(3)), Some(2));
        assert_eq!(dest.depth_of(m(5)), Some(3));
        assert_eq!(ids(dest.levels()), vec![vec![1], vec![2], vec![3], vec![5]]);
    }

    #[test]
    fn test_merge_detects_ancestor_cycle() {
        // Stream 1: 1 -> 2 -> 3 (3 taps after 2). Stream 3: 3 -> 2.
        let s1 = DependencyTree::build_for_stream(
            key(1),
            &[(m(2), TapPoint::Source), (m(3), TapPoint::After(m(2)))],
        )
        .unwrap();
        let s3 = DependencyTree::build_for_stream(key(3), &[(m(2), TapPoint::Source)]).unwrap();

        let mut dest = DependencyTree::new();
        dest.merge(&s1).unwrap();
        let err = dest.merge(&s3).unwrap_err();
        assert!(matches!(err, PipelineError::GraphCycle(_)));
    }

    #[test]
    fn test_merge_all_requeues_processor_streams() {
        let trees = vec![
            StreamTree {
                key: key(4),
                from_processor: true,
                tree: DependencyTree::build_for_stream(key(4), &[(m(5), TapPoint::Source)])
                    .unwrap(),
            },
            StreamTree {
                key: key(3),
                from_processor: true,
                tree: DependencyTree::build_for_stream(key(3), &[(m(4), TapPoint::Source)])
                    .unwrap(),
            },
            StreamTree {
                key: key(1),
                from_processor: false,
                tree: DependencyTree::build_for_stream(key(1), &[(m(3), TapPoint::Source)])
                    .unwrap(),
            },
        ];
        let dest = merge_all(&trees).unwrap();
        assert_eq!(ids(dest.levels()), vec![vec![1], vec![3], vec![4], vec![5]]);
    }

    #[test]
    fn test_merge_all_unplaceable_producer() {
        let trees = vec![
            StreamTree {
                key: key(1),
                from_processor: false,
                tree: DependencyTree::build_for_stream(key(1), &[(m(2), TapPoint::Source)])
                    .unwrap(),
            },
            StreamTree {
                key: key(8),
                from_processor: true,
                tree: DependencyTree::build_for_stream(key(8), &[(m(9), TapPoint::Source)])
                    .unwrap(),
            },
        ];
        let err = merge_all(&trees).unwrap_err();
        assert!(err.to_string().contains("(8, 1)"));
    }

    #[test]
    fn test_display_marks_fillers() {
        let s1 = DependencyTree::build_for_stream(
            key(1),
            &[(m(3), TapPoint::Source), (m(4), TapPoint::Source)],
        )
        .unwrap();
        let s3 = DependencyTree::build_for_stream(key(3), &[(m(4), TapPoint::Source)]).unwrap();
        let mut dest = DependencyTree::new();
        dest.merge(&s1).unwrap();
        dest.merge(&s3).unwrap();
        let text = dest.to_string();
        assert!(text.contains("- (depth 1)"));
        assert!(text.contains("#4 (depth 2)"));
    }
}
