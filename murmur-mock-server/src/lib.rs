use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::bail;
use async_trait::async_trait;
use murmur_api::{
    Comment, CommentId, CounterDelta, Store, Subject, Time, UserId, VoteCommit, VoteType,
};
use parking_lot::Mutex;

/// Store operations that can be made to fail on demand
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailPoint {
    ListTopLevel,
    ListReplies,
    GetComment,
    InsertComment,
    UpdateComment,
    DeleteComment,
    GetVote,
    GetVotes,
    SetVote,
    ClearVote,
    ClearAllVotes,
    CommitVote,
}

#[derive(Default)]
struct State {
    comments: HashMap<CommentId, Comment>,

    // keyed by pair, so there can be at most one row per (comment, user)
    votes: HashMap<(CommentId, UserId), VoteType>,
}

/// In-memory stand-in for the hosted database
#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
    faults: Mutex<HashSet<FailPoint>>,
    interleave: AtomicBool,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Yield to the scheduler at the start of every operation, so that
    /// concurrently running callers interleave like they would over a network
    pub fn interleaved(self) -> MemStore {
        self.interleave.store(true, Ordering::Relaxed);
        self
    }

    /// Make the next call to `point` fail
    pub fn fail_next(&self, point: FailPoint) {
        self.faults.lock().insert(point);
    }

    async fn enter(&self, point: FailPoint) -> anyhow::Result<()> {
        if self.interleave.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        if self.faults.lock().remove(&point) {
            tracing::debug!(?point, "injecting store failure");
            bail!("injected failure at {point:?}");
        }
        Ok(())
    }

    pub fn test_num_comments(&self) -> usize {
        self.state.lock().comments.len()
    }

    pub fn test_comment(&self, id: CommentId) -> Option<Comment> {
        self.state.lock().comments.get(&id).cloned()
    }

    pub fn test_num_vote_rows(&self) -> usize {
        self.state.lock().votes.len()
    }

    /// Number of (upvote, downvote) ledger rows for `comment`
    pub fn test_ledger_counts(&self, comment: CommentId) -> (i64, i64) {
        let state = self.state.lock();
        let mut counts = (0, 0);
        for ((c, _), v) in state.votes.iter() {
            if *c == comment {
                match v {
                    VoteType::Upvote => counts.0 += 1,
                    VoteType::Downvote => counts.1 += 1,
                }
            }
        }
        counts
    }

    /// Checks that every comment's counters agree with the ledger and that
    /// no ledger row points to a missing comment
    pub fn test_check_consistency(&self) -> Result<(), String> {
        let state = self.state.lock();
        let mut from_ledger: HashMap<CommentId, (i64, i64)> = HashMap::new();
        for ((c, u), v) in state.votes.iter() {
            if !state.comments.contains_key(c) {
                return Err(format!("vote of {u:?} references missing comment {c:?}"));
            }
            let e = from_ledger.entry(*c).or_default();
            match v {
                VoteType::Upvote => e.0 += 1,
                VoteType::Downvote => e.1 += 1,
            }
        }
        for c in state.comments.values() {
            let (up, down) = from_ledger.get(&c.id).copied().unwrap_or_default();
            if (c.upvotes_count, c.downvotes_count) != (up, down) {
                return Err(format!(
                    "comment {:?} has counters ({}, {}) but ledger says ({up}, {down})",
                    c.id, c.upvotes_count, c.downvotes_count,
                ));
            }
        }
        Ok(())
    }
}

fn newest_first(comments: &mut [Comment]) {
    comments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn oldest_first(comments: &mut [Comment]) {
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl Store for MemStore {
    async fn list_top_level(&self, subject: &Subject) -> anyhow::Result<Vec<Comment>> {
        self.enter(FailPoint::ListTopLevel).await?;
        let mut res = self
            .state
            .lock()
            .comments
            .values()
            .filter(|c| c.parent_id.is_none() && c.subject == *subject)
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut res);
        Ok(res)
    }

    async fn list_replies(&self, parent: CommentId) -> anyhow::Result<Vec<Comment>> {
        self.list_replies_of(&[parent]).await
    }

    async fn list_replies_of(&self, parents: &[CommentId]) -> anyhow::Result<Vec<Comment>> {
        self.enter(FailPoint::ListReplies).await?;
        let mut res = self
            .state
            .lock()
            .comments
            .values()
            .filter(|c| matches!(c.parent_id, Some(p) if parents.contains(&p)))
            .cloned()
            .collect::<Vec<_>>();
        oldest_first(&mut res);
        Ok(res)
    }

    async fn get_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        self.enter(FailPoint::GetComment).await?;
        Ok(self.state.lock().comments.get(&id).cloned())
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        self.enter(FailPoint::InsertComment).await?;
        let mut state = self.state.lock();
        if state.comments.contains_key(&comment.id) {
            bail!("comment id {:?} already used", comment.id);
        }
        state.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn update_comment_body(
        &self,
        id: CommentId,
        body: &str,
        edited_at: Time,
    ) -> anyhow::Result<Option<Comment>> {
        self.enter(FailPoint::UpdateComment).await?;
        Ok(self.state.lock().comments.get_mut(&id).map(|c| {
            c.body = String::from(body);
            c.edited_at = Some(edited_at);
            c.clone()
        }))
    }

    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<bool> {
        self.enter(FailPoint::DeleteComment).await?;
        let mut state = self.state.lock();
        if state.votes.keys().any(|(c, _)| *c == id) {
            bail!("comment {id:?} is still referenced by votes");
        }
        Ok(state.comments.remove(&id).is_some())
    }

    async fn get_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<Option<VoteType>> {
        self.enter(FailPoint::GetVote).await?;
        Ok(self.state.lock().votes.get(&(comment, user)).copied())
    }

    async fn get_votes_for_user(
        &self,
        comments: &[CommentId],
        user: UserId,
    ) -> anyhow::Result<HashMap<CommentId, VoteType>> {
        self.enter(FailPoint::GetVotes).await?;
        let state = self.state.lock();
        Ok(comments
            .iter()
            .filter_map(|c| state.votes.get(&(*c, user)).map(|v| (*c, *v)))
            .collect())
    }

    async fn set_vote(
        &self,
        comment: CommentId,
        user: UserId,
        vote: VoteType,
    ) -> anyhow::Result<()> {
        self.enter(FailPoint::SetVote).await?;
        let mut state = self.state.lock();
        if !state.comments.contains_key(&comment) {
            bail!("voting on missing comment {comment:?}");
        }
        state.votes.insert((comment, user), vote);
        Ok(())
    }

    async fn clear_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<()> {
        self.enter(FailPoint::ClearVote).await?;
        self.state.lock().votes.remove(&(comment, user));
        Ok(())
    }

    async fn clear_all_votes_for_comment(&self, comment: CommentId) -> anyhow::Result<u64> {
        self.enter(FailPoint::ClearAllVotes).await?;
        let mut state = self.state.lock();
        let before = state.votes.len();
        state.votes.retain(|(c, _), _| *c != comment);
        if let Some(c) = state.comments.get_mut(&comment) {
            c.upvotes_count = 0;
            c.downvotes_count = 0;
        }
        Ok((before - state.votes.len()) as u64)
    }

    async fn commit_vote(
        &self,
        comment: CommentId,
        user: UserId,
        expected: Option<VoteType>,
        target: Option<VoteType>,
        delta: CounterDelta,
    ) -> anyhow::Result<VoteCommit> {
        self.enter(FailPoint::CommitVote).await?;
        let mut state = self.state.lock();
        if !state.comments.contains_key(&comment) {
            return Ok(VoteCommit::MissingComment);
        }
        let actual = state.votes.get(&(comment, user)).copied();
        if actual != expected {
            return Ok(VoteCommit::Stale { actual });
        }
        match target {
            Some(v) => state.votes.insert((comment, user), v),
            None => state.votes.remove(&(comment, user)),
        };
        let c = state
            .comments
            .get_mut(&comment)
            .expect("comment disappeared while holding the state lock");
        (c.upvotes_count, c.downvotes_count) = delta.apply(c.upvotes_count, c.downvotes_count);
        Ok(VoteCommit::Committed {
            upvotes: c.upvotes_count,
            downvotes: c.downvotes_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use murmur_api::{SubjectType, Uuid};

    use super::*;

    fn comment(subject: &Subject, parent_id: Option<CommentId>, minutes: i64) -> Comment {
        Comment {
            id: CommentId::new(),
            subject: subject.clone(),
            author_id: UserId::stub(),
            body: String::from("first!"),
            parent_id,
            created_at: Utc::now() + Duration::minutes(minutes),
            edited_at: None,
            upvotes_count: 0,
            downvotes_count: 0,
        }
    }

    #[tokio::test]
    async fn lists_in_display_order() {
        let store = MemStore::new();
        let firm = Subject::new(SubjectType::PropFirm, "apex");
        let other = Subject::new(SubjectType::News, "apex");
        let old = comment(&firm, None, 0);
        let new = comment(&firm, None, 10);
        let elsewhere = comment(&other, None, 5);
        let late_reply = comment(&firm, Some(old.id), 20);
        let early_reply = comment(&firm, Some(old.id), 1);
        for c in [&old, &new, &elsewhere, &late_reply, &early_reply] {
            store.insert_comment(c).await.unwrap();
        }

        let top = store.list_top_level(&firm).await.unwrap();
        assert_eq!(
            top.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![new.id, old.id]
        );
        let replies = store.list_replies(old.id).await.unwrap();
        assert_eq!(
            replies.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![early_reply.id, late_reply.id]
        );
        assert!(store.list_replies(new.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_is_conditional() {
        let store = MemStore::new();
        let c = comment(&Subject::new(SubjectType::Blog, "hello"), None, 0);
        store.insert_comment(&c).await.unwrap();
        let user = UserId(Uuid::new_v4());
        let up = CounterDelta::between(None, Some(VoteType::Upvote));

        assert_eq!(
            store
                .commit_vote(c.id, user, None, Some(VoteType::Upvote), up)
                .await
                .unwrap(),
            VoteCommit::Committed {
                upvotes: 1,
                downvotes: 0
            },
        );
        assert_eq!(
            store
                .commit_vote(c.id, user, None, Some(VoteType::Upvote), up)
                .await
                .unwrap(),
            VoteCommit::Stale {
                actual: Some(VoteType::Upvote)
            },
        );
        assert_eq!(store.test_ledger_counts(c.id), (1, 0));
        assert_eq!(
            store
                .commit_vote(CommentId::new(), user, None, Some(VoteType::Upvote), up)
                .await
                .unwrap(),
            VoteCommit::MissingComment,
        );
        store.test_check_consistency().unwrap();
    }

    #[tokio::test]
    async fn delete_refused_while_votes_remain() {
        let store = MemStore::new();
        let c = comment(&Subject::new(SubjectType::Blog, "hello"), None, 0);
        store.insert_comment(&c).await.unwrap();
        store
            .set_vote(c.id, UserId::stub(), VoteType::Downvote)
            .await
            .unwrap();
        assert!(store.delete_comment(c.id).await.is_err());
        assert_eq!(store.clear_all_votes_for_comment(c.id).await.unwrap(), 1);
        store.test_check_consistency().unwrap();
        assert!(store.delete_comment(c.id).await.unwrap());
        assert!(!store.delete_comment(c.id).await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemStore::new();
        store.fail_next(FailPoint::GetVote);
        assert!(store.get_vote(CommentId::stub(), UserId::stub()).await.is_err());
        assert_eq!(
            store.get_vote(CommentId::stub(), UserId::stub()).await.unwrap(),
            None
        );
    }
}
