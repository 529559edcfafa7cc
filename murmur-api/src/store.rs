use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    Comment, CommentId, CounterDelta, Removal, Subject, Time, UserId, VoteCommit, VoteType,
};

/// The transactional data store backing comments and the vote ledger.
///
/// Every method is a single round trip. Failures are opaque: callers treat any
/// `Err` as the store being unavailable.
#[async_trait]
pub trait Store: Send + Sync {
    /// Top-level comments of `subject`, newest first
    async fn list_top_level(&self, subject: &Subject) -> anyhow::Result<Vec<Comment>>;

    /// Replies of `parent`, oldest first
    async fn list_replies(&self, parent: CommentId) -> anyhow::Result<Vec<Comment>>;

    /// Replies of all of `parents` at once, oldest first
    async fn list_replies_of(&self, parents: &[CommentId]) -> anyhow::Result<Vec<Comment>>;

    async fn get_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>>;

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()>;

    /// Returns the updated comment, or None if it does not exist
    async fn update_comment_body(
        &self,
        id: CommentId,
        body: &str,
        edited_at: Time,
    ) -> anyhow::Result<Option<Comment>>;

    /// Returns whether a row was removed. Must fail while votes still
    /// reference the comment.
    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<bool>;

    async fn get_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<Option<VoteType>>;

    async fn get_votes_for_user(
        &self,
        comments: &[CommentId],
        user: UserId,
    ) -> anyhow::Result<HashMap<CommentId, VoteType>>;

    /// Unconditional upsert of the (comment, user) ledger row. Counters are
    /// left alone.
    async fn set_vote(&self, comment: CommentId, user: UserId, vote: VoteType)
        -> anyhow::Result<()>;

    /// Unconditional removal of the (comment, user) ledger row. Counters are
    /// left alone.
    async fn clear_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<()>;

    /// Removes every ledger row of `comment` and zeroes its counters in the
    /// same atomic unit as `commit_vote`. Returns the number of rows removed.
    async fn clear_all_votes_for_comment(&self, comment: CommentId) -> anyhow::Result<u64>;

    /// Atomically: if the ledger row for (comment, user) is still `expected`,
    /// replace it with `target` and add `delta` to the comment's counters,
    /// flooring them at zero. Either everything is written or nothing is.
    async fn commit_vote(
        &self,
        comment: CommentId,
        user: UserId,
        expected: Option<VoteType>,
        target: Option<VoteType>,
        delta: CounterDelta,
    ) -> anyhow::Result<VoteCommit>;
}

/// Callbacks into the UI layer embedding a comment section
pub trait Frontend: Send + Sync {
    /// An anonymous visitor tried to do something that needs an account
    fn on_login_modal_open(&self);

    /// A comment is gone and should disappear from any rendered tree
    fn on_comment_removed(&self, _removal: &Removal) {}
}

