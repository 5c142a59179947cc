//! Reassembly of the flat, path-ordered comment rows of one thread into a
//! forest of [`TreeNode`]s, plus the read-time masking of deleted comments.
//!
//! Rows arrive ordered by `(path, created_at)`, so a parent is always seen
//! before any of its replies and a single pass over the rows is enough.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Attachment, CommentPage, CommentRow, Id, TreeNode, UserSummary};

struct Slot {
    node: Option<TreeNode>,
    replies: Vec<usize>,
}

/// The folded reply forest of a thread, before pagination.
pub struct CommentForest {
    slots: Vec<Slot>,
    roots: Vec<usize>,
}

impl CommentForest {
    pub fn fold(rows: Vec<CommentRow>) -> Self {
        let mut slots: Vec<Slot> = Vec::with_capacity(rows.len());
        let mut index: HashMap<Id, usize> = HashMap::with_capacity(rows.len());
        let mut roots = Vec::new();

        for row in rows {
            let at = slots.len();
            let parent = row.parent_id;
            let id = row.id;
            match parent {
                None => roots.push(at),
                Some(pid) => match index.get(&pid) {
                    Some(&p) => slots[p].replies.push(at),
                    None => {
                        tracing::warn!(comment_id = id, parent_id = pid, "dropping reply whose parent was not materialized first");
                        continue;
                    }
                },
            }
            index.insert(id, at);
            slots.push(Slot { node: Some(TreeNode::from(row)), replies: Vec::new() });
        }

        let mut forest = Self { slots, roots };
        forest.order_siblings();
        forest
    }

    // Path order sorts siblings by id; restate it as creation order.
    fn order_siblings(&mut self) {
        let keys: Vec<_> = self.slots.iter()
            .map(|s| s.node.as_ref().map(|n| (n.created_at, n.id)))
            .collect();
        self.roots.sort_by_key(|&i| keys[i]);
        for slot in &mut self.slots {
            slot.replies.sort_by_key(|&i| keys[i]);
        }
    }

    /// Number of top-level comments in the forest.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Materializes top-level comments `offset..offset + limit`, each with
    /// its complete reply subtree.
    pub fn into_page(mut self, offset: usize, limit: usize) -> Vec<TreeNode> {
        let picked: Vec<usize> = self.roots.iter().copied().skip(offset).take(limit).collect();
        picked.into_iter().filter_map(|i| self.take(i)).collect()
    }

    // Explicit stack instead of recursion: reply chains have no depth limit.
    fn take(&mut self, root: usize) -> Option<TreeNode> {
        let mut preorder = Vec::new();
        let mut stack = vec![root];
        while let Some(at) = stack.pop() {
            preorder.push(at);
            stack.extend(self.slots[at].replies.iter().copied());
        }
        // reversed pre-order visits every reply before its parent
        for &at in preorder.iter().rev() {
            let replies = std::mem::take(&mut self.slots[at].replies);
            let children: Vec<TreeNode> = replies.into_iter()
                .filter_map(|i| self.slots[i].node.take())
                .collect();
            if let Some(node) = self.slots[at].node.as_mut() {
                node.replies = children;
            }
        }
        self.slots[root].node.take()
    }
}

/// Hides the content, author and attachments of every deleted node while
/// keeping the node itself, its ids and its replies in place.
pub fn mask_deleted(nodes: &mut [TreeNode]) {
    let mut stack: Vec<&mut TreeNode> = nodes.iter_mut().collect();
    while let Some(node) = stack.pop() {
        if node.is_deleted {
            node.content = None;
            node.user = None;
            node.attachments.clear();
        }
        stack.extend(node.replies.iter_mut());
    }
}

// Every field of a node except `replies`, which the writer below nests by hand.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeFields<'a> {
    id: Id,
    thread_id: Id,
    user_id: Id,
    parent_id: Option<Id>,
    content: &'a Option<String>,
    attachments: &'a [Attachment],
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    user: &'a Option<UserSummary>,
}

impl<'a> From<&'a TreeNode> for NodeFields<'a> {
    fn from(n: &'a TreeNode) -> Self {
        NodeFields {
            id: n.id,
            thread_id: n.thread_id,
            user_id: n.user_id,
            parent_id: n.parent_id,
            content: &n.content,
            attachments: &n.attachments,
            is_deleted: n.is_deleted,
            created_at: n.created_at,
            updated_at: n.updated_at,
            user: &n.user,
        }
    }
}

/// Writes `nodes` as a JSON array, nesting `replies` with an explicit stack.
/// The output matches the derived `Serialize` of [`TreeNode`].
pub fn write_nodes(nodes: &[TreeNode], out: &mut Vec<u8>) -> serde_json::Result<()> {
    out.push(b'[');
    let mut stack = vec![(nodes.iter(), true)];
    while let Some((siblings, first)) = stack.last_mut() {
        let Some(node) = siblings.next() else {
            stack.pop();
            out.push(b']');
            if !stack.is_empty() {
                out.push(b'}');
            }
            continue;
        };
        if !std::mem::replace(first, false) {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, &NodeFields::from(node))?;
        out.pop(); // reopen the object
        out.extend_from_slice(b",\"replies\":[");
        stack.push((node.replies.iter(), true));
    }
    Ok(())
}

/// JSON body of a [`CommentPage`], safe for arbitrarily deep reply chains.
pub fn page_json(page: &CommentPage) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(b"{\"comments\":");
    write_nodes(&page.comments, &mut out)?;
    out.extend_from_slice(b",\"pagination\":");
    serde_json::to_writer(&mut out, &page.pagination)?;
    out.push(b'}');
    Ok(out)
}
