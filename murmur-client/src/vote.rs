use anyhow::Context;

use crate::{
    api::{self, CommentId, UserId, VoteAction, VoteCommit, VoteOutcome},
    Comments, Error,
};

impl Comments {
    /// Handles one click on a vote button of `comment` by `actor`.
    ///
    /// Clicks of the same user on the same comment are serialized; the
    /// decision is taken against the ledger as stored, and committed only if
    /// it is still what was read.
    pub async fn vote(
        &self,
        actor: Option<UserId>,
        comment: CommentId,
        action: VoteAction,
    ) -> Result<VoteOutcome, Error> {
        let user = actor.ok_or_else(Error::not_authenticated)?;
        let _guard = self.locks.lock(comment, user).await;

        let current = self
            .store
            .get_vote(comment, user)
            .await
            .with_context(|| format!("reading vote of {user:?} on {comment:?}"))?;
        let t = action.apply_to(current);
        tracing::debug!(?comment, ?user, ?action, from = ?t.from, to = ?t.to, "vote transition");

        let commit = self
            .store
            .commit_vote(comment, user, t.from, t.to, t.delta)
            .await
            .with_context(|| format!("committing vote of {user:?} on {comment:?}"))?;
        match commit {
            VoteCommit::Committed { upvotes, downvotes } => Ok(VoteOutcome {
                comment,
                vote: t.to,
                upvotes,
                downvotes,
            }),
            VoteCommit::Stale { actual } => {
                tracing::warn!(
                    ?comment,
                    ?user,
                    expected = ?t.from,
                    ?actual,
                    "vote changed concurrently, not retrying"
                );
                Err(Error::Api(api::Error::Conflict(format!(
                    "vote on {comment:?} changed while it was being updated"
                ))))
            }
            VoteCommit::MissingComment => Err(Error::unknown_comment(comment)),
        }
    }
}
