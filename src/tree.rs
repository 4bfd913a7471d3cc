//! Flat-to-tree assembly for water balance nodes.
//!
//! Records arrive as flat `(id, pid)` rows. They are indexed into an arena,
//! linked to their parents, annotated with a `/`-joined path and finally
//! moved out of the arena into an owned forest.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::warn;

/// One flat row as returned by a record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRecord {
    pub id: i64,
    /// Parent id. `0` or an id missing from the result set marks a root.
    pub pid: i64,
    pub name: String,
    pub water_volume: f64,
    pub water_amount: f64,
}

/// A node of the assembled forest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: i64,
    pub pid: i64,
    pub name: String,
    pub water_volume: f64,
    pub water_amount: f64,
    /// Ancestor names from the root down to this node, joined by `/`.
    pub path: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn from_record(record: &FlatRecord) -> Self {
        Self {
            id: record.id,
            pid: record.pid,
            name: record.name.clone(),
            water_volume: record.water_volume,
            water_amount: record.water_amount,
            path: String::new(),
            children: Vec::new(),
        }
    }
}

/// Counters collected while assembling, used for request logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Distinct nodes in the forest.
    pub nodes: usize,
    pub roots: usize,
    /// Nodes whose `pid` did not resolve to any record.
    pub orphans: usize,
    /// Nodes detached from a parent cycle and promoted to roots.
    pub cycle_breaks: usize,
    /// Records that overwrote an earlier record with the same id.
    pub duplicates: usize,
}

/// Assemble flat records into a forest of [`TreeNode`]s.
pub fn assemble(records: &[FlatRecord]) -> Vec<TreeNode> {
    assemble_with_stats(records).0
}

/// Assemble flat records into a forest, also reporting what was repaired.
///
/// - Duplicate ids: the last record wins, positioned where the id first appears.
/// - Orphans (`pid` not in the set) and `pid == 0` become roots.
/// - Nodes on a parent cycle (including `pid == id`) become roots.
///
/// Root order and per-parent child order follow input order.
pub fn assemble_with_stats(records: &[FlatRecord]) -> (Vec<TreeNode>, AssemblyStats) {
    let mut stats = AssemblyStats::default();

    // Index: id -> arena slot
    let mut index: HashMap<i64, usize> = HashMap::with_capacity(records.len());
    let mut arena: Vec<TreeNode> = Vec::with_capacity(records.len());
    for record in records {
        match index.entry(record.id) {
            Entry::Occupied(slot) => {
                arena[*slot.get()] = TreeNode::from_record(record);
                stats.duplicates += 1;
            }
            Entry::Vacant(slot) => {
                slot.insert(arena.len());
                arena.push(TreeNode::from_record(record));
            }
        }
    }

    // Resolve parents
    let mut parent: Vec<Option<usize>> = arena
        .iter()
        .map(|node| {
            if node.pid == 0 {
                return None;
            }
            let resolved = index.get(&node.pid).copied();
            if resolved.is_none() {
                stats.orphans += 1;
            }
            resolved
        })
        .collect();

    stats.cycle_breaks = break_cycles(&arena, &mut parent);

    // Link in input order, one position per id
    let mut roots: Vec<usize> = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
    let mut placed = vec![false; arena.len()];
    for record in records {
        let Some(&slot) = index.get(&record.id) else {
            continue;
        };
        if std::mem::replace(&mut placed[slot], true) {
            continue;
        }
        match parent[slot] {
            Some(p) => children[p].push(slot),
            None => roots.push(slot),
        }
    }

    // Paths, top-down in pre-order
    let mut order: Vec<usize> = Vec::with_capacity(arena.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    for &root in &roots {
        arena[root].path = arena[root].name.clone();
    }
    while let Some(slot) = stack.pop() {
        order.push(slot);
        for &child in children[slot].iter().rev() {
            arena[child].path = format!("{}/{}", arena[slot].path, arena[child].name);
            stack.push(child);
        }
    }

    // Move children into parents, deepest first
    let mut built: Vec<Option<TreeNode>> = arena.into_iter().map(Some).collect();
    for &slot in order.iter().rev() {
        let kids: Vec<TreeNode> = children[slot]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if let Some(node) = built[slot].as_mut() {
            node.children = kids;
        }
    }

    let forest: Vec<TreeNode> = roots
        .iter()
        .filter_map(|&root| built[root].take())
        .collect();

    stats.nodes = order.len();
    stats.roots = forest.len();
    (forest, stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unseen,
    Walking,
    Done,
}

/// Clear the parent link of every slot that lies on a parent cycle.
///
/// Each slot is walked at most once. Slots hanging below a cycle keep their
/// parent, since the cycle members they lead to become roots.
fn break_cycles(arena: &[TreeNode], parent: &mut [Option<usize>]) -> usize {
    let mut marks = vec![Mark::Unseen; parent.len()];
    let mut walk: Vec<usize> = Vec::new();
    let mut on_cycle: Vec<usize> = Vec::new();

    for start in 0..parent.len() {
        if marks[start] != Mark::Unseen {
            continue;
        }

        walk.clear();
        let mut cursor = Some(start);
        while let Some(slot) = cursor {
            match marks[slot] {
                Mark::Done => break,
                Mark::Walking => {
                    // Everything walked since `slot` closes the loop
                    if let Some(pos) = walk.iter().position(|&s| s == slot) {
                        on_cycle.extend_from_slice(&walk[pos..]);
                    }
                    break;
                }
                Mark::Unseen => {
                    marks[slot] = Mark::Walking;
                    walk.push(slot);
                    cursor = parent[slot];
                }
            }
        }

        for &slot in &walk {
            marks[slot] = Mark::Done;
        }
    }

    for &slot in &on_cycle {
        let node = &arena[slot];
        warn!(
            "Node {} ({}) is on a parent cycle via pid {}, treating it as a root",
            node.id, node.name, node.pid
        );
        parent[slot] = None;
    }

    on_cycle.len()
}
