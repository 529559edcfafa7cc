use anyhow::Context;
use chrono::Utc;

use crate::{
    api::{self, Comment, CommentId, Removal, Subject, UserId},
    Comments, Error, OrphanPolicy,
};

impl Comments {
    /// Trims `body` and checks it can be stored
    fn validate_body(&self, body: &str) -> Result<String, Error> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::Api(api::Error::EmptyBody));
        }
        let len = body.chars().count();
        if len > self.config.max_body_len {
            return Err(Error::Api(api::Error::BodyTooLong {
                len,
                max: self.config.max_body_len,
            }));
        }
        api::validate_string(body)?;
        Ok(String::from(body))
    }

    /// Fetches `id`, checking `user` wrote it
    async fn fetch_own(&self, user: UserId, id: CommentId) -> Result<Comment, Error> {
        let comment = self
            .store
            .get_comment(id)
            .await
            .with_context(|| format!("fetching comment {id:?}"))?
            .ok_or_else(|| Error::unknown_comment(id))?;
        if comment.author_id != user {
            tracing::info!(
                ?user,
                comment = ?id,
                author = ?comment.author_id,
                "refusing to touch a comment of somebody else"
            );
            return Err(Error::permission_denied());
        }
        Ok(comment)
    }

    async fn insert(
        &self,
        author_id: UserId,
        subject: Subject,
        parent_id: Option<CommentId>,
        body: String,
    ) -> Result<Comment, Error> {
        let comment = Comment {
            id: CommentId::new(),
            subject,
            author_id,
            body,
            parent_id,
            created_at: Utc::now(),
            edited_at: None,
            upvotes_count: 0,
            downvotes_count: 0,
        };
        self.store
            .insert_comment(&comment)
            .await
            .with_context(|| format!("inserting comment {:?}", comment.id))?;
        tracing::debug!(id = ?comment.id, subject = %comment.subject, ?parent_id, "new comment");
        Ok(comment)
    }

    /// Starts a new thread on `subject`
    pub async fn create_comment(
        &self,
        actor: Option<UserId>,
        subject: &Subject,
        body: &str,
    ) -> Result<Comment, Error> {
        let user = actor.ok_or_else(Error::not_authenticated)?;
        subject.validate()?;
        let body = self.validate_body(body)?;
        self.insert(user, subject.clone(), None, body).await
    }

    /// Answers the top-level comment `parent`. Replies to replies are refused.
    pub async fn create_reply(
        &self,
        actor: Option<UserId>,
        parent: CommentId,
        body: &str,
    ) -> Result<Comment, Error> {
        let user = actor.ok_or_else(Error::not_authenticated)?;
        let body = self.validate_body(body)?;
        let parent = self
            .store
            .get_comment(parent)
            .await
            .with_context(|| format!("fetching parent comment {parent:?}"))?
            .ok_or_else(|| Error::unknown_comment(parent))?;
        if !parent.is_top_level() {
            return Err(Error::Api(api::Error::ReplyTooDeep(parent.id)));
        }
        self.insert(user, parent.subject, Some(parent.id), body)
            .await
    }

    pub async fn edit_comment(
        &self,
        actor: Option<UserId>,
        id: CommentId,
        body: &str,
    ) -> Result<Comment, Error> {
        let user = actor.ok_or_else(Error::not_authenticated)?;
        let body = self.validate_body(body)?;
        self.fetch_own(user, id).await?;
        self.store
            .update_comment_body(id, &body, Utc::now())
            .await
            .with_context(|| format!("updating body of comment {id:?}"))?
            .ok_or_else(|| Error::unknown_comment(id))
    }

    /// Removes the votes of `id`, then `id` itself. Nothing is deleted if
    /// clearing the votes failed.
    async fn purge(&self, id: CommentId) -> Result<u64, Error> {
        let votes = self
            .store
            .clear_all_votes_for_comment(id)
            .await
            .with_context(|| format!("clearing votes of comment {id:?}"))?;
        let removed = self
            .store
            .delete_comment(id)
            .await
            .with_context(|| format!("deleting comment {id:?}"))?;
        if !removed {
            return Err(Error::unknown_comment(id));
        }
        Ok(votes)
    }

    pub async fn delete_comment(
        &self,
        actor: Option<UserId>,
        id: CommentId,
    ) -> Result<Removal, Error> {
        let user = actor.ok_or_else(Error::not_authenticated)?;
        let comment = self.fetch_own(user, id).await?;

        let replies = match comment.is_top_level() {
            true => self
                .store
                .list_replies(id)
                .await
                .with_context(|| format!("listing replies of comment {id:?}"))?,
            false => Vec::new(),
        };

        let mut votes_cleared = 0;
        if self.config.orphan_policy == OrphanPolicy::CascadeReplies {
            for r in replies.iter() {
                votes_cleared += self.purge(r.id).await?;
            }
        }
        votes_cleared += self.purge(id).await?;

        tracing::debug!(
            comment = ?id,
            replies = replies.len(),
            policy = ?self.config.orphan_policy,
            votes_cleared,
            "deleted comment"
        );
        Ok(Removal {
            comment: id,
            subtree: replies.into_iter().map(|r| r.id).collect(),
            votes_cleared,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use murmur_mock_server::{FailPoint, MemStore};

    use crate::{
        api::{self, ErrorKind, VoteAction},
        test_util::*,
        Comments, Config, Error, OrphanPolicy,
    };

    fn api_err<T: std::fmt::Debug>(r: Result<T, Error>) -> api::Error {
        match r {
            Err(Error::Api(e)) => e,
            r => panic!("expected an api error, got {r:?}"),
        }
    }

    #[tokio::test]
    async fn create_trims_and_validates() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let u = user();
        let c = engine
            .create_comment(Some(u), &firm(), "  payouts were fast \n")
            .await
            .unwrap();
        assert_eq!(c.body, "payouts were fast");
        assert_eq!(c.author_id, u);
        assert!(c.is_top_level());
        assert_eq!((c.upvotes_count, c.downvotes_count), (0, 0));
        assert_eq!(store.test_comment(c.id), Some(c));

        assert_eq!(
            api_err(engine.create_comment(Some(u), &firm(), " \t\n").await),
            api::Error::EmptyBody
        );
        assert_eq!(
            api_err(engine.create_comment(Some(u), &firm(), "a\0b").await),
            api::Error::NullByteInString(String::from("a\0b"))
        );
        assert_eq!(
            engine
                .create_comment(None, &firm(), "hi")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotAuthenticated
        );
        assert_eq!(store.test_num_comments(), 1);
    }

    #[tokio::test]
    async fn body_length_is_bounded() {
        let store = Arc::new(MemStore::new());
        let engine = Comments::new(
            store.clone(),
            Config {
                max_body_len: 5,
                ..Config::default()
            },
        );
        engine.create_comment(Some(user()), &firm(), "héllo").await.unwrap();
        assert_eq!(
            api_err(engine.create_comment(Some(user()), &firm(), "hello!").await),
            api::Error::BodyTooLong { len: 6, max: 5 }
        );
    }

    #[tokio::test]
    async fn replies_are_one_level_deep() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let top = engine.create_comment(Some(user()), &firm(), "top").await.unwrap();
        let reply = engine.create_reply(Some(user()), top.id, "reply").await.unwrap();
        assert_eq!(reply.parent_id, Some(top.id));
        assert_eq!(reply.subject, top.subject);

        assert_eq!(
            api_err(engine.create_reply(Some(user()), reply.id, "nested").await),
            api::Error::ReplyTooDeep(reply.id)
        );
        let missing = api::CommentId::new();
        assert_eq!(
            api_err(engine.create_reply(Some(user()), missing, "hello?").await),
            api::Error::UnknownComment(missing)
        );
        assert_eq!(store.test_num_comments(), 2);
    }

    #[tokio::test]
    async fn only_the_author_edits() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let author = user();
        let c = engine.create_comment(Some(author), &firm(), "v1").await.unwrap();

        assert_eq!(
            api_err(engine.edit_comment(Some(user()), c.id, "hijacked").await),
            api::Error::PermissionDenied
        );
        assert_eq!(store.test_comment(c.id).unwrap().body, "v1");

        let edited = engine.edit_comment(Some(author), c.id, " v2 ").await.unwrap();
        assert_eq!(edited.body, "v2");
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.created_at, c.created_at);
    }

    #[tokio::test]
    async fn scenario_delete_keeps_orphans() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let author = user();
        let top = engine.create_comment(Some(author), &firm(), "top").await.unwrap();
        let r1 = engine.create_reply(Some(user()), top.id, "r1").await.unwrap();
        let r2 = engine.create_reply(Some(user()), top.id, "r2").await.unwrap();
        for action in [
            VoteAction::ClickUpvote,
            VoteAction::ClickUpvote,
            VoteAction::ClickDownvote,
        ] {
            engine.vote(Some(user()), top.id, action).await.unwrap();
        }
        assert_eq!(store.test_num_vote_rows(), 3);

        assert_eq!(
            api_err(engine.delete_comment(Some(user()), top.id).await),
            api::Error::PermissionDenied
        );
        let removal = engine.delete_comment(Some(author), top.id).await.unwrap();
        assert_eq!(removal.comment, top.id);
        let mut subtree = removal.subtree.clone();
        subtree.sort();
        let mut expected = vec![r1.id, r2.id];
        expected.sort();
        assert_eq!(subtree, expected);
        assert_eq!(removal.votes_cleared, 3);

        assert_eq!(store.test_num_vote_rows(), 0);
        assert!(store.test_comment(top.id).is_none());
        assert_eq!(store.test_comment(r1.id).unwrap().parent_id, Some(top.id));
        assert!(store.test_comment(r2.id).is_some());
        assert!(engine.build_tree(&firm(), None).await.unwrap().roots.is_empty());
        store.test_check_consistency().unwrap();
    }

    #[tokio::test]
    async fn delete_can_cascade_to_replies() {
        let store = Arc::new(MemStore::new());
        let engine = Comments::new(
            store.clone(),
            Config {
                orphan_policy: OrphanPolicy::CascadeReplies,
                ..Config::default()
            },
        );
        let author = user();
        let top = engine.create_comment(Some(author), &firm(), "top").await.unwrap();
        let reply = engine.create_reply(Some(user()), top.id, "r").await.unwrap();
        engine
            .vote(Some(user()), reply.id, VoteAction::ClickDownvote)
            .await
            .unwrap();

        let removal = engine.delete_comment(Some(author), top.id).await.unwrap();
        assert_eq!(removal.subtree, vec![reply.id]);
        assert_eq!(removal.votes_cleared, 1);
        assert_eq!(store.test_num_comments(), 0);
        assert_eq!(store.test_num_vote_rows(), 0);
    }

    #[tokio::test]
    async fn deleting_a_reply_leaves_the_thread() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let replier = user();
        let top = engine.create_comment(Some(user()), &firm(), "top").await.unwrap();
        let reply = engine.create_reply(Some(replier), top.id, "r").await.unwrap();
        let removal = engine.delete_comment(Some(replier), reply.id).await.unwrap();
        assert!(removal.subtree.is_empty());
        let tree = engine.build_tree(&firm(), None).await.unwrap();
        assert_eq!(tree.total_comments(), 1);
    }

    #[tokio::test]
    async fn failing_to_clear_votes_keeps_the_comment() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let author = user();
        let c = engine.create_comment(Some(author), &firm(), "keep me").await.unwrap();
        engine
            .vote(Some(user()), c.id, VoteAction::ClickUpvote)
            .await
            .unwrap();

        store.fail_next(FailPoint::ClearAllVotes);
        let err = engine.delete_comment(Some(author), c.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.test_comment(c.id).is_some());
        assert_eq!(store.test_num_vote_rows(), 1);
        assert_eq!(store.test_ledger_counts(c.id), (1, 0));
        store.test_check_consistency().unwrap();
    }

    #[tokio::test]
    async fn failing_to_delete_after_clearing_is_reported() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let author = user();
        let c = engine.create_comment(Some(author), &firm(), "x").await.unwrap();
        store.fail_next(FailPoint::DeleteComment);
        assert!(engine.delete_comment(Some(author), c.id).await.is_err());
        assert!(store.test_comment(c.id).is_some());
        // a retry goes through
        engine.delete_comment(Some(author), c.id).await.unwrap();
        assert_eq!(store.test_num_comments(), 0);
    }

    #[tokio::test]
    async fn failed_delete_keeps_counters_in_step_with_ledger() {
        let store = Arc::new(MemStore::new());
        let engine = engine(&store);
        let author = user();
        let voter = user();
        let c = engine.create_comment(Some(author), &firm(), "x").await.unwrap();
        engine
            .vote(Some(voter), c.id, VoteAction::ClickUpvote)
            .await
            .unwrap();

        store.fail_next(FailPoint::DeleteComment);
        assert!(engine.delete_comment(Some(author), c.id).await.is_err());
        let kept = store.test_comment(c.id).unwrap();
        assert_eq!((kept.upvotes_count, kept.downvotes_count), (0, 0));
        store.test_check_consistency().unwrap();

        // the voter's row is gone, so clicking again counts them exactly once
        let outcome = engine
            .vote(Some(voter), c.id, VoteAction::ClickUpvote)
            .await
            .unwrap();
        assert_eq!((outcome.upvotes, outcome.downvotes), (1, 0));
        assert_eq!(store.test_ledger_counts(c.id), (1, 0));
        store.test_check_consistency().unwrap();
    }
}
