//! Rebuilds reply trees from the flat comment list the backend returns.
//!
//! Input order is taken as creation order and is never re-sorted: siblings
//! come out in the same relative order they went in.

use std::collections::HashMap;

use crate::models::{Comment, CommentNode};

/// Build the reply forest for one snapshot of comments.
///
/// A comment whose `parent_id` is null, or points at a comment missing from
/// the snapshot, becomes a root. Parent cycles are cut at their earliest
/// member, which becomes a root, so every comment appears exactly once.
pub fn build_forest(comments: Vec<Comment>) -> Vec<CommentNode> {
    let parents = resolve_parents(&comments);

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    for (idx, parent) in parents.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(idx),
            None => roots.push(idx),
        }
    }

    let mut slots: Vec<Option<CommentNode>> =
        comments.into_iter().map(|c| Some(CommentNode::new(c))).collect();

    // Post-order assembly so every child is complete before it moves into its parent.
    for &root in &roots {
        let mut stack = vec![(root, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                let kids: Vec<CommentNode> = children[idx]
                    .iter()
                    .filter_map(|&c| slots[c].take())
                    .collect();
                if let Some(node) = slots[idx].as_mut() {
                    node.children = kids;
                }
            } else {
                stack.push((idx, true));
                stack.extend(children[idx].iter().map(|&c| (c, false)));
            }
        }
    }

    roots.into_iter().filter_map(|r| slots[r].take()).collect()
}

/// Effective parent index for every comment, with dangling references and
/// cycles already turned into roots.
fn resolve_parents(comments: &[Comment]) -> Vec<Option<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(comments.len());
    for (idx, comment) in comments.iter().enumerate() {
        index.entry(comment.id.as_str()).or_insert(idx);
    }

    let mut parents: Vec<Option<usize>> = comments
        .iter()
        .map(|c| c.parent_id.as_deref().and_then(|p| index.get(p).copied()))
        .collect();

    // 0 = unvisited, 1 = on the current walk, 2 = known to reach a root
    let mut state = vec![0u8; comments.len()];
    for start in 0..comments.len() {
        if state[start] != 0 {
            continue;
        }

        let mut path = Vec::new();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            match state[idx] {
                2 => break,
                1 => {
                    let cycle_from = path.iter().position(|&p| p == idx).unwrap_or(0);
                    if let Some(&earliest) = path[cycle_from..].iter().min() {
                        parents[earliest] = None;
                    }
                    break;
                }
                _ => {
                    state[idx] = 1;
                    path.push(idx);
                    cursor = parents[idx];
                }
            }
        }

        for idx in path {
            state[idx] = 2;
        }
    }

    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::flatten_forest;
    use chrono::{TimeZone, Utc};

    fn comment(id: &str, parent: Option<&str>) -> Comment {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Comment {
            id: id.to_string(),
            topic_id: "topic".to_string(),
            user_id: "user".to_string(),
            parent_id: parent.map(str::to_string),
            content: format!("body of {id}"),
            created_at: at,
            updated_at: at,
            profiles: None,
        }
    }

    fn ids(forest: &[CommentNode]) -> Vec<(usize, String)> {
        flatten_forest(forest)
            .into_iter()
            .map(|(depth, c)| (depth, c.id.clone()))
            .collect()
    }

    #[test]
    fn empty_input_gives_empty_forest() {
        assert!(build_forest(Vec::new()).is_empty());
    }

    #[test]
    fn nests_replies_under_parents() {
        let forest = build_forest(vec![
            comment("A", None),
            comment("B", Some("A")),
            comment("C", None),
            comment("D", Some("B")),
        ]);

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].comment.id, "A");
        assert_eq!(forest[0].children[0].comment.id, "B");
        assert_eq!(forest[0].children[0].children[0].comment.id, "D");
        assert_eq!(forest[1].comment.id, "C");
        assert!(forest[1].children.is_empty());
    }

    #[test]
    fn dangling_parent_becomes_root() {
        let forest = build_forest(vec![comment("A", Some("gone")), comment("B", Some("A"))]);
        assert_eq!(ids(&forest), vec![(0, "A".into()), (1, "B".into())]);
    }

    #[test]
    fn reply_listed_before_parent_still_nests() {
        let forest = build_forest(vec![comment("B", Some("A")), comment("A", None)]);
        assert_eq!(ids(&forest), vec![(0, "A".into()), (1, "B".into())]);
    }

    #[test]
    fn sibling_order_follows_input() {
        let forest = build_forest(vec![
            comment("root", None),
            comment("z", Some("root")),
            comment("a", Some("root")),
            comment("m", Some("root")),
        ]);
        let children: Vec<&str> = forest[0]
            .children
            .iter()
            .map(|n| n.comment.id.as_str())
            .collect();
        assert_eq!(children, ["z", "a", "m"]);
    }

    #[test]
    fn self_reference_is_a_root() {
        let forest = build_forest(vec![comment("A", Some("A"))]);
        assert_eq!(ids(&forest), vec![(0, "A".into())]);
    }

    #[test]
    fn cycle_is_broken_at_earliest_member() {
        let forest = build_forest(vec![
            comment("X", None),
            comment("A", Some("C")),
            comment("B", Some("A")),
            comment("C", Some("B")),
        ]);
        assert_eq!(
            ids(&forest),
            vec![
                (0, "X".into()),
                (0, "A".into()),
                (1, "B".into()),
                (2, "C".into()),
            ]
        );
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let mut comments = vec![comment("0", None)];
        for i in 1..5_000 {
            comments.push(comment(&i.to_string(), Some(&(i - 1).to_string())));
        }
        let forest = build_forest(comments);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].descendant_count(), 4_999);
        assert_eq!(flatten_forest(&forest).last().map(|(depth, _)| *depth), Some(4_999));
        drop(forest);
    }
}
