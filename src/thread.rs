//! Reply-graph reconstruction over a chronologically ordered message list.
//!
//! Used by bulk pulls: find the conversation a message belongs to, collect
//! it depth-first, then merge runs of plain messages before re-sending.

use crate::platform::BasicMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Longest content a merged message may carry.
pub const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedMessage {
    pub id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reply_to: Option<u64>,
    #[serde(flatten)]
    pub body: BasicMessage,
}

#[derive(Debug, Clone, Copy)]
struct Edge<'a> {
    message: &'a ArchivedMessage,
    /// `false` for continuation edges inferred from unreplied messages.
    explicit: bool,
}

/// Parent -> children edges, children in list order.
#[derive(Debug, Default)]
pub struct ReplyIndex<'a> {
    children: HashMap<u64, Vec<Edge<'a>>>,
    parents: HashMap<u64, u64>,
}

impl<'a> ReplyIndex<'a> {
    pub fn children_of(&self, id: u64) -> impl Iterator<Item = &'a ArchivedMessage> + '_ {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .map(|edge| edge.message)
    }

    pub fn parent_of(&self, id: u64) -> Option<u64> {
        self.parents.get(&id).copied()
    }

    fn is_ancestor(&self, candidate: u64, of: u64) -> bool {
        let mut current = Some(of);
        let mut seen = HashSet::new();
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            if !seen.insert(id) {
                return false;
            }
            current = self.parent_of(id);
        }
        false
    }

    fn link(&mut self, parent: u64, child: &'a ArchivedMessage, explicit: bool) -> bool {
        if self.parents.contains_key(&child.id) || self.is_ancestor(child.id, parent) {
            return false;
        }
        self.parents.insert(child.id, parent);
        self.children.entry(parent).or_default().push(Edge {
            message: child,
            explicit,
        });
        true
    }
}

/// Group messages under the message they reply to.
///
/// A message without a reply is chained under the most recent reply target
/// while at most `loose_depth` such messages have been seen since the last
/// explicit reply. `0` disables loose chaining.
pub fn build_reply_index(messages: &[ArchivedMessage], loose_depth: usize) -> ReplyIndex<'_> {
    let known: HashSet<u64> = messages.iter().map(|m| m.id).collect();
    let mut index = ReplyIndex::default();
    let mut last_target: Option<u64> = None;
    let mut budget = loose_depth;

    for m in messages {
        match m.reply_to {
            Some(target) => {
                if known.contains(&target) && index.link(target, m, true) {
                    last_target = Some(target);
                    budget = loose_depth;
                }
            }
            None => {
                if budget == 0 {
                    continue;
                }
                budget -= 1;
                if let Some(parent) = last_target {
                    if index.link(parent, m, false) {
                        last_target = Some(m.id);
                    }
                }
            }
        }
    }
    index
}

/// Ultimate ancestor of `message_id`, or `None` if it has no recorded parent.
pub fn root_of(message_id: u64, index: &ReplyIndex<'_>) -> Option<u64> {
    let mut root = None;
    let mut current = message_id;
    let mut seen = HashSet::from([message_id]);
    while let Some(parent) = index.parent_of(current) {
        if !seen.insert(parent) {
            break;
        }
        root = Some(parent);
        current = parent;
    }
    root
}

/// Depth-first descendants of `root_id`, each at most once and never the root
/// itself. `max_depth` bounds how far loose continuation edges are followed;
/// crossing an explicit reply restores the full budget. `None` is unbounded.
pub fn expand_subtree<'a>(
    root_id: u64,
    index: &ReplyIndex<'a>,
    max_depth: Option<usize>,
) -> Vec<&'a ArchivedMessage> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([root_id]);
    extend(root_id, index, max_depth, max_depth, &mut out, &mut seen);
    out
}

fn extend<'a>(
    id: u64,
    index: &ReplyIndex<'a>,
    remaining: Option<usize>,
    max_depth: Option<usize>,
    out: &mut Vec<&'a ArchivedMessage>,
    seen: &mut HashSet<u64>,
) {
    if remaining == Some(0) {
        return;
    }
    let Some(edges) = index.children.get(&id) else {
        return;
    };
    for edge in edges {
        if !seen.insert(edge.message.id) {
            continue;
        }
        out.push(edge.message);
        let budget = if edge.explicit { max_depth } else { remaining };
        extend(
            edge.message.id,
            index,
            budget.map(|d| d.saturating_sub(1)),
            max_depth,
            out,
            seen,
        );
    }
}

/// The conversation `anchor_id` belongs to: its root followed by every
/// descendant of that root.
pub fn conversation<'a>(
    messages: &'a [ArchivedMessage],
    index: &ReplyIndex<'a>,
    anchor_id: u64,
    max_depth: Option<usize>,
) -> Vec<&'a ArchivedMessage> {
    let root_id = root_of(anchor_id, index).unwrap_or(anchor_id);
    let mut out: Vec<&ArchivedMessage> = messages.iter().filter(|m| m.id == root_id).collect();
    out.extend(expand_subtree(root_id, index, max_depth));
    out
}

/// Merge consecutive plain-text messages from the same author, newline-joined,
/// without exceeding [`MAX_CONTENT_CHARS`]. Attachments, embeds or an author
/// change start a new message.
pub fn flatten<'a, I>(messages: I) -> Vec<BasicMessage>
where
    I: IntoIterator<Item = &'a BasicMessage>,
{
    let mut merged: Vec<BasicMessage> = Vec::new();
    for msg in messages {
        if let Some(prev) = merged.last_mut() {
            let plain = |m: &BasicMessage| m.attachments.is_empty() && m.embeds.is_empty();
            if prev.author.id == msg.author.id && plain(&*prev) && plain(msg) {
                let combined = prev.content.chars().count() + 1 + msg.content.chars().count();
                if combined <= MAX_CONTENT_CHARS {
                    prev.content.push('\n');
                    prev.content.push_str(&msg.content);
                    continue;
                }
            }
        }
        merged.push(msg.clone());
    }
    merged
}
