use crate::{CommentId, Subject, Time, UserId, VoteType};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub subject: Subject,
    pub author_id: UserId,
    pub body: String,

    /// None for top-level comments. Replies only ever point to a top-level
    /// comment, but the parent may since have been deleted.
    pub parent_id: Option<CommentId>,

    pub created_at: Time,
    pub edited_at: Option<Time>,

    // denormalized from the vote ledger
    pub upvotes_count: i64,
    pub downvotes_count: i64,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn score(&self) -> i64 {
        self.upvotes_count - self.downvotes_count
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentTreeNode {
    pub comment: Comment,

    /// Oldest first
    pub replies: Vec<CommentTreeNode>,

    /// Vote of the user the tree was built for
    pub user_vote: Option<VoteType>,
}

impl CommentTreeNode {
    pub fn leaf(comment: Comment, user_vote: Option<VoteType>) -> CommentTreeNode {
        CommentTreeNode {
            comment,
            replies: Vec::new(),
            user_vote,
        }
    }

    pub fn score(&self) -> i64 {
        self.comment.score()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommentTreeNode> {
        std::iter::once(self).chain(self.replies.iter())
    }
}

/// A subject's discussion, top-level comments newest first
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentTree {
    pub roots: Vec<CommentTreeNode>,
}

impl CommentTree {
    /// What the "N comments" header shows
    pub fn total_comments(&self) -> usize {
        self.roots.iter().map(|r| 1 + r.replies.len()).sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CommentTreeNode> {
        self.roots.iter().flat_map(|r| r.iter())
    }

    pub fn for_each_node_mut(&mut self, mut f: impl FnMut(&mut CommentTreeNode)) {
        for r in self.roots.iter_mut() {
            f(r);
            for c in r.replies.iter_mut() {
                f(c);
            }
        }
    }

    pub fn find(&self, id: CommentId) -> Option<&CommentTreeNode> {
        self.nodes().find(|n| n.comment.id == id)
    }

    /// Removes a comment and everything below it from this in-memory view
    pub fn drop_subtree(&mut self, id: CommentId) -> bool {
        let before = self.total_comments();
        self.roots.retain(|r| r.comment.id != id);
        for r in self.roots.iter_mut() {
            r.replies.retain(|c| c.comment.id != id);
        }
        before != self.total_comments()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub body: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub body: String,
}

/// What a deletion took away, for callers that keep a rendered tree around
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Removal {
    pub comment: CommentId,

    /// Replies that are no longer reachable from any tree
    pub subtree: Vec<CommentId>,

    pub votes_cleared: u64,
}
