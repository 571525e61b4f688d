//! Projection of the flat comment list into a depth-bounded thread tree.
//!
//! The tree is never edited in place: every change to the flat list is
//! followed by a full [`build`].

use std::collections::{HashMap, HashSet};

use crate::{api::CommentId, CommentRecord};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub record: CommentRecord,

    /// Distance to the root thread, 0 for roots
    pub depth: usize,

    /// Replies, newest first
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    pub fn id(&self) -> &CommentId {
        &self.record.id
    }

    pub fn find_in<'a>(nodes: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
        for n in nodes {
            if n.record.id == *id {
                return Some(n);
            }
            if let Some(res) = CommentNode::find_in(&n.children, id) {
                return Some(res);
            }
        }
        None
    }

    /// Number of replies below this node, at any depth
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Ids of this node and of everything below it
    pub fn subtree_ids(&self) -> Vec<CommentId> {
        let mut res = Vec::with_capacity(1 + self.descendant_count());
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            res.push(n.record.id.clone());
            stack.extend(n.children.iter());
        }
        res
    }
}

/// Total number of nodes in a forest
pub fn count(nodes: &[CommentNode]) -> usize {
    nodes.iter().map(|n| 1 + n.descendant_count()).sum()
}

/// Everything a delete of `node` takes down: its subtree, plus every record
/// whose parent chain in the flat list reaches it. Replies that were too
/// deep sit elsewhere in the tree but still go.
pub fn cascade(records: &[CommentRecord], node: &CommentNode) -> HashSet<CommentId> {
    let mut doomed = node.subtree_ids().into_iter().collect::<HashSet<_>>();
    loop {
        let before = doomed.len();
        for r in records {
            if let Some(p) = &r.parent_id {
                if doomed.contains(p) && !doomed.contains(&r.id) {
                    doomed.insert(r.id.clone());
                }
            }
        }
        if doomed.len() == before {
            return doomed;
        }
    }
}

/// Pre-order walk over a forest, in display order
pub fn walk(nodes: &[CommentNode]) -> Vec<&CommentNode> {
    let mut res = Vec::new();
    let mut stack = nodes.iter().rev().collect::<Vec<_>>();
    while let Some(n) = stack.pop() {
        res.push(n);
        stack.extend(n.children.iter().rev());
    }
    res
}

#[derive(Clone, Copy, Debug)]
enum Placement {
    Unresolved,
    // on the parent chain currently being walked
    Resolving,
    Placed { depth: usize, parent: Option<usize> },
}

/// Builds the thread tree out of the flat list.
///
/// Records end up as roots when they have no parent, when their parent is
/// not in `records`, when they are part of a parent cycle, or when placing
/// them under their parent would exceed `max_depth`. Nothing is ever
/// dropped. Siblings are ordered newest first, ties broken by id.
pub fn build(records: &[CommentRecord], max_depth: usize) -> Vec<CommentNode> {
    let mut index = HashMap::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        if index.insert(&r.id, i).is_some() {
            tracing::warn!(id = %r.id, "duplicate comment id, replies attach to the last one");
        }
    }
    let parent_of = |i: usize| -> Option<usize> {
        records[i]
            .parent_id
            .as_ref()
            .and_then(|p| index.get(p).copied())
    };

    let mut placement = vec![Placement::Unresolved; records.len()];
    let mut chain: Vec<usize> = Vec::new();
    for start in 0..records.len() {
        // Climb until something already placed, a root, or a cycle
        let mut cur = start;
        loop {
            match placement[cur] {
                Placement::Placed { .. } => break,
                Placement::Resolving => {
                    let pos = chain.iter().position(|&i| i == cur).unwrap_or(0);
                    for &i in &chain[pos..] {
                        tracing::warn!(id = %records[i].id, "comment is part of a parent cycle, showing it as a root");
                        placement[i] = Placement::Placed {
                            depth: 0,
                            parent: None,
                        };
                    }
                    chain.truncate(pos);
                    break;
                }
                Placement::Unresolved => match parent_of(cur) {
                    Some(p) => {
                        placement[cur] = Placement::Resolving;
                        chain.push(cur);
                        cur = p;
                    }
                    None => {
                        if let Some(p) = &records[cur].parent_id {
                            tracing::debug!(id = %records[cur].id, parent = %p, "parent not found, showing comment as a root");
                        }
                        placement[cur] = Placement::Placed {
                            depth: 0,
                            parent: None,
                        };
                        break;
                    }
                },
            }
        }
        // Then walk back down, every parent now being placed
        while let Some(i) = chain.pop() {
            let parent = parent_of(i);
            let parent_depth = match parent.map(|p| placement[p]) {
                Some(Placement::Placed { depth, .. }) => Some(depth),
                _ => None,
            };
            placement[i] = match (parent, parent_depth) {
                (Some(p), Some(d)) if d < max_depth => Placement::Placed {
                    depth: d + 1,
                    parent: Some(p),
                },
                (Some(_), Some(_)) => {
                    tracing::debug!(id = %records[i].id, max_depth, "reply too deep, showing it as a root");
                    Placement::Placed {
                        depth: 0,
                        parent: None,
                    }
                }
                _ => Placement::Placed {
                    depth: 0,
                    parent: None,
                },
            };
        }
    }

    let mut children = vec![Vec::new(); records.len()];
    let mut roots = Vec::new();
    for (i, p) in placement.iter().enumerate() {
        match p {
            Placement::Placed {
                parent: Some(p), ..
            } => children[*p].push(i),
            _ => roots.push(i),
        }
    }

    tracing::debug!(records = records.len(), roots = roots.len(), "rebuilt comment tree");
    assemble(records, &children, &roots, 0)
}

fn assemble(
    records: &[CommentRecord],
    children: &[Vec<usize>],
    siblings: &[usize],
    depth: usize,
) -> Vec<CommentNode> {
    let mut nodes = siblings
        .iter()
        .map(|&i| CommentNode {
            record: records[i].clone(),
            depth,
            children: assemble(records, children, &children[i], depth + 1),
        })
        .collect::<Vec<_>>();
    nodes.sort_by(|a, b| {
        b.record
            .created_at
            .cmp(&a.record.created_at)
            .then_with(|| b.record.id.cmp(&a.record.id))
    });
    nodes
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::api::Time;

    fn t(secs: i64) -> Time {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn rec(id: u64, parent: Option<u64>, secs: i64) -> CommentRecord {
        CommentRecord {
            id: CommentId::from(id),
            parent_id: parent.map(CommentId::from),
            author: format!("author {id}"),
            content: format!("comment {id}"),
            created_at: t(secs),
            likes: 0,
            device: String::new(),
            is_admin: false,
        }
    }

    /// (id, depth, children) skeleton, easier to compare than full nodes
    #[derive(Debug, Eq, PartialEq)]
    struct Shape(u64, usize, Vec<Shape>);

    fn shape(nodes: &[CommentNode]) -> Vec<Shape> {
        nodes
            .iter()
            .map(|n| {
                Shape(
                    n.record.id.as_number().unwrap(),
                    n.depth,
                    shape(&n.children),
                )
            })
            .collect()
    }

    #[test]
    fn reply_nests_under_parent() {
        let tree = build(&[rec(1, None, 1), rec(2, Some(1), 2)], 5);
        assert_eq!(shape(&tree), vec![Shape(1, 0, vec![Shape(2, 1, vec![])])]);
    }

    #[test]
    fn overflowing_reply_becomes_root() {
        let records = [
            rec(1, None, 1),
            rec(2, Some(1), 2),
            rec(3, Some(2), 3),
            rec(4, Some(3), 4),
        ];
        let tree = build(&records, 2);
        assert_eq!(
            shape(&tree),
            vec![
                Shape(4, 0, vec![]),
                Shape(1, 0, vec![Shape(2, 1, vec![Shape(3, 2, vec![])])]),
            ]
        );
    }

    #[test]
    fn reply_to_flattened_node_uses_effective_depth() {
        let records = [
            rec(1, None, 1),
            rec(2, Some(1), 2),
            rec(3, Some(2), 3),
            rec(4, Some(3), 4),
        ];
        let tree = build(&records, 1);
        // 3 overflows and becomes a root, so 4 sits right under it
        assert_eq!(
            shape(&tree),
            vec![
                Shape(3, 0, vec![Shape(4, 1, vec![])]),
                Shape(1, 0, vec![Shape(2, 1, vec![])]),
            ]
        );
    }

    #[test]
    fn max_depth_zero_flattens_everything() {
        let tree = build(&[rec(1, None, 1), rec(2, Some(1), 2), rec(3, Some(2), 3)], 0);
        assert_eq!(
            shape(&tree),
            vec![Shape(3, 0, vec![]), Shape(2, 0, vec![]), Shape(1, 0, vec![])]
        );
    }

    #[test]
    fn orphans_become_roots() {
        let tree = build(&[rec(1, None, 1), rec(2, Some(99), 2)], 5);
        assert_eq!(shape(&tree), vec![Shape(2, 0, vec![]), Shape(1, 0, vec![])]);
    }

    #[test]
    fn children_ordering_ignores_input_order() {
        let records = vec![
            rec(1, None, 10),
            rec(2, Some(1), 11),
            rec(3, Some(1), 13),
            rec(4, Some(1), 12),
            rec(5, None, 20),
        ];
        let expected = vec![
            Shape(5, 0, vec![]),
            Shape(
                1,
                0,
                vec![Shape(3, 1, vec![]), Shape(4, 1, vec![]), Shape(2, 1, vec![])],
            ),
        ];
        assert_eq!(shape(&build(&records, 5)), expected);
        let mut reversed = records;
        reversed.reverse();
        assert_eq!(shape(&build(&reversed, 5)), expected);
    }

    #[test]
    fn parents_after_children_in_input() {
        let tree = build(&[rec(3, Some(2), 3), rec(2, Some(1), 2), rec(1, None, 1)], 5);
        assert_eq!(
            shape(&tree),
            vec![Shape(1, 0, vec![Shape(2, 1, vec![Shape(3, 2, vec![])])])]
        );
    }

    #[test]
    fn cycles_become_roots() {
        // 1 -> 2 -> 3 -> 1, with 4 hanging off the cycle and 5 pointing at itself
        let records = [
            rec(1, Some(3), 1),
            rec(2, Some(1), 2),
            rec(3, Some(2), 3),
            rec(4, Some(2), 4),
            rec(5, Some(5), 5),
        ];
        let tree = build(&records, 5);
        assert_eq!(
            shape(&tree),
            vec![
                Shape(5, 0, vec![]),
                Shape(3, 0, vec![]),
                Shape(2, 0, vec![Shape(4, 1, vec![])]),
                Shape(1, 0, vec![]),
            ]
        );
    }

    #[test]
    fn duplicate_ids_keep_every_record() {
        let records = [rec(1, None, 1), rec(1, None, 2), rec(2, Some(1), 3)];
        let tree = build(&records, 5);
        assert_eq!(count(&tree), 3);
        // replies attach to the last record seen with that id
        let newest = &tree[0];
        assert_eq!(newest.record.created_at, t(2));
        assert_eq!(newest.children.len(), 1);
    }

    #[test]
    fn helpers() {
        let tree = build(
            &[
                rec(1, None, 1),
                rec(2, Some(1), 2),
                rec(3, Some(1), 3),
                rec(4, Some(3), 4),
                rec(5, None, 5),
            ],
            5,
        );
        let one = CommentNode::find_in(&tree, &CommentId::from(1)).unwrap();
        assert_eq!(one.descendant_count(), 3);
        let mut ids = one.subtree_ids();
        ids.sort();
        assert_eq!(
            ids,
            [1, 2, 3, 4].into_iter().map(CommentId::from).collect::<Vec<_>>()
        );
        assert!(CommentNode::find_in(&tree, &CommentId::from(4)).is_some());
        assert!(CommentNode::find_in(&tree, &CommentId::from(6)).is_none());
        let order = walk(&tree)
            .into_iter()
            .map(|n| n.record.id.as_number().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![5, 1, 3, 4, 2]);
    }

    /// Turns fuzzer input into records with unique ids. Parents may point
    /// anywhere, including nowhere, forward, or at the record itself.
    fn gen_records(input: &[(Option<u8>, u16)]) -> Vec<CommentRecord> {
        input
            .iter()
            .enumerate()
            .map(|(i, (parent, secs))| {
                rec(i as u64, parent.map(u64::from), i64::from(*secs))
            })
            .collect()
    }

    fn check_invariants(nodes: &[CommentNode], max_depth: usize, depth: usize) {
        for w in nodes.windows(2) {
            assert!(
                w[0].record.created_at >= w[1].record.created_at,
                "siblings out of order"
            );
        }
        for n in nodes {
            assert_eq!(n.depth, depth);
            assert!(n.depth <= max_depth);
            for c in &n.children {
                assert_eq!(c.record.parent_id.as_ref(), Some(&n.record.id));
            }
            check_invariants(&n.children, max_depth, depth + 1);
        }
    }

    #[test]
    fn fuzz_build_invariants() {
        bolero::check!()
            .with_type::<(u8, Vec<(Option<u8>, u16)>)>()
            .cloned()
            .for_each(|(max_depth, input)| {
                let max_depth = usize::from(max_depth % 7);
                let records = gen_records(&input);
                let tree = build(&records, max_depth);

                // depth bound, parent consistency and ordering
                check_invariants(&tree, max_depth, 0);

                // conservation
                assert_eq!(count(&tree), records.len());

                // orphans are roots
                let ids = records.iter().map(|r| &r.id).collect::<Vec<_>>();
                for r in &records {
                    if let Some(p) = &r.parent_id {
                        if !ids.contains(&p) {
                            assert!(tree.iter().any(|n| n.record.id == r.id));
                        }
                    }
                }

                // output only depends on the records, not on their order
                let mut reversed = records.clone();
                reversed.reverse();
                assert_eq!(shape(&build(&reversed, max_depth)), shape(&tree));
            })
    }

    #[test]
    fn cascade_follows_flattened_replies() {
        let records = [
            rec(1, None, 1),
            rec(2, Some(1), 2),
            rec(3, Some(2), 3),
            rec(4, Some(3), 4),
            rec(5, None, 5),
        ];
        let tree = build(&records, 1);
        let one = CommentNode::find_in(&tree, &CommentId::from(1)).unwrap();
        assert_eq!(one.descendant_count(), 1);
        let mut doomed = cascade(&records, one).into_iter().collect::<Vec<_>>();
        doomed.sort();
        assert_eq!(
            doomed,
            [1, 2, 3, 4].into_iter().map(CommentId::from).collect::<Vec<_>>()
        );
    }

    /// Ids whose parent chain in the flat list reaches `target`
    fn reachable(records: &[CommentRecord], target: &CommentId) -> HashSet<CommentId> {
        records
            .iter()
            .filter(|r| {
                let mut cur = Some(&r.id);
                let mut steps = 0;
                while let Some(id) = cur {
                    if id == target {
                        return true;
                    }
                    if steps > records.len() {
                        return false;
                    }
                    steps += 1;
                    cur = records
                        .iter()
                        .find(|p| &p.id == id)
                        .and_then(|p| p.parent_id.as_ref());
                }
                false
            })
            .map(|r| r.id.clone())
            .collect()
    }

    #[test]
    fn fuzz_cascade_removes_whole_subtree() {
        bolero::check!()
            .with_type::<(u8, u8, Vec<(Option<u8>, u16)>)>()
            .cloned()
            .for_each(|(pick, max_depth, input)| {
                let records = gen_records(&input);
                if records.is_empty() {
                    return;
                }
                let max_depth = usize::from(max_depth % 4);
                let tree = build(&records, max_depth);
                let target = CommentId::from(u64::from(pick) % records.len() as u64);
                let node = CommentNode::find_in(&tree, &target).unwrap();
                let removed = cascade(&records, node);
                assert!(removed.len() > node.descendant_count());

                // whatever the tree looked like, the flat list decides
                let mut expected = reachable(&records, &target);
                expected.extend(node.subtree_ids());
                assert_eq!(removed, expected);

                let remaining = records
                    .iter()
                    .filter(|r| !removed.contains(&r.id))
                    .cloned()
                    .collect::<Vec<_>>();
                assert_eq!(remaining.len(), records.len() - removed.len());
                for r in &remaining {
                    if let Some(p) = &r.parent_id {
                        assert!(!removed.contains(p), "reply to a deleted comment survived");
                    }
                }
                let rebuilt = build(&remaining, max_depth);
                let mut seen = HashMap::new();
                for n in walk(&rebuilt) {
                    assert!(!removed.contains(n.id()));
                    *seen.entry(n.id().clone()).or_insert(0) += 1;
                }
                assert_eq!(seen.len(), remaining.len());
            })
    }
}
