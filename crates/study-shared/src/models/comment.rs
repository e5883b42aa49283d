use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author display fields denormalized onto each comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub topic_id: String,
    pub user_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<AuthorProfile>,
}

impl Comment {
    pub fn is_edited(&self) -> bool {
        self.updated_at != self.created_at
    }

    pub fn author_name(&self) -> &str {
        self.profiles
            .as_ref()
            .and_then(|p| p.username.as_deref())
            .unwrap_or("unknown")
    }
}

/// A comment with its replies, as produced by [`crate::thread::build_forest`].
///
/// Only ever built in memory; the wire carries flat [`Comment`] lists.
#[derive(Debug)]
pub struct CommentNode {
    pub comment: Comment,
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    pub fn new(comment: Comment) -> Self {
        Self {
            comment,
            children: Vec::new(),
        }
    }

    /// Number of replies below this node, at any depth.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&CommentNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

impl Drop for CommentNode {
    fn drop(&mut self) {
        // Unlink replies first so a long chain never drops recursively.
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Depth-first walk of a forest in render order, paired with nesting depth.
pub fn flatten_forest(forest: &[CommentNode]) -> Vec<(usize, &Comment)> {
    let mut out = Vec::new();
    let mut stack: Vec<(usize, &CommentNode)> = forest.iter().rev().map(|n| (0, n)).collect();

    while let Some((depth, node)) = stack.pop() {
        out.push((depth, &node.comment));
        for child in node.children.iter().rev() {
            stack.push((depth + 1, child));
        }
    }

    out
}
