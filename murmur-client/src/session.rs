use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    api::{
        Comment, CommentId, CommentTree, ErrorKind, Frontend, Removal, Subject, UserId,
        VoteAction, VoteOutcome,
    },
    CachedVote, Comments, Error, VoteCache,
};

/// One viewer's comment section: the engine, who is looking, and what their
/// vote buttons currently show
pub struct Session {
    comments: Arc<Comments>,
    actor: Option<UserId>,
    frontend: Arc<dyn Frontend>,
    cache: Mutex<VoteCache>,
}

impl Session {
    pub fn new(
        comments: Arc<Comments>,
        actor: Option<UserId>,
        frontend: Arc<dyn Frontend>,
    ) -> Session {
        Session {
            comments,
            actor,
            frontend,
            cache: Mutex::new(VoteCache::new()),
        }
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    /// Asks the frontend for a login if `err` calls for one
    fn prompt_on_anonymous<T>(&self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &res {
            if e.kind() == ErrorKind::NotAuthenticated {
                tracing::debug!("anonymous mutation attempt, opening login modal");
                self.frontend.on_login_modal_open();
            }
        }
        res
    }

    /// Builds the tree of `subject`, merging in-flight clicks over server state
    pub async fn load(&self, subject: &Subject) -> Result<CommentTree, Error> {
        let mut tree = self.comments.build_tree(subject, self.actor).await?;
        let cache = {
            let mut cache = self.cache.lock();
            cache.absorb_tree(&tree);
            cache.clone()
        };
        cache.overlay(&mut tree);
        Ok(tree)
    }

    /// Re-renders an already loaded tree with the latest cached vote state
    pub fn view(&self, tree: &mut CommentTree) {
        self.cache.lock().overlay(tree);
    }

    pub fn cached(&self, comment: CommentId) -> Option<CachedVote> {
        self.cache.lock().get(comment)
    }

    pub fn cache_snapshot(&self) -> VoteCache {
        self.cache.lock().clone()
    }

    /// Applies the click to the cache right away, then reconciles with what
    /// the store answers. On failure the buttons go back to what the store last
    /// confirmed, with any other clicks still in flight on top.
    pub async fn click(
        &self,
        comment: CommentId,
        action: VoteAction,
    ) -> Result<VoteOutcome, Error> {
        if self.actor.is_none() {
            return self.prompt_on_anonymous(Err(Error::not_authenticated()));
        }
        let ticket = self.cache.lock().begin(comment, action);
        match self.comments.vote(self.actor, comment, action).await {
            Ok(outcome) => {
                self.cache.lock().confirm(&outcome, ticket);
                Ok(outcome)
            }
            Err(err) => {
                if let Some(ticket) = ticket {
                    tracing::warn!(?comment, ?action, ?err, "vote failed, rolling back");
                    self.cache.lock().rollback(comment, ticket);
                }
                Err(err)
            }
        }
    }

    pub async fn post(&self, subject: &Subject, body: &str) -> Result<Comment, Error> {
        let res = self.comments.create_comment(self.actor, subject, body).await;
        self.prompt_on_anonymous(res)
    }

    pub async fn reply(&self, parent: CommentId, body: &str) -> Result<Comment, Error> {
        let res = self.comments.create_reply(self.actor, parent, body).await;
        self.prompt_on_anonymous(res)
    }

    pub async fn edit(&self, comment: CommentId, body: &str) -> Result<Comment, Error> {
        let res = self.comments.edit_comment(self.actor, comment, body).await;
        self.prompt_on_anonymous(res)
    }

    pub async fn delete(&self, comment: CommentId) -> Result<Removal, Error> {
        let removal = self
            .prompt_on_anonymous(self.comments.delete_comment(self.actor, comment).await)?;
        // orphaned replies are never rendered again under either policy
        self.cache
            .lock()
            .forget(std::iter::once(removal.comment).chain(removal.subtree.iter().copied()));
        self.frontend.on_comment_removed(&removal);
        Ok(removal)
    }
}
