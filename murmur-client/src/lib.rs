use std::sync::Arc;

mod cache;
pub use cache::{CachedVote, ClickTicket, VoteCache};

mod config;
pub use config::{Config, OrphanPolicy};

mod error;
pub use error::Error;

mod locks;
use locks::PairLocks;

mod mutation;

mod session;
pub use session::Session;

mod tree;

mod vote;

pub mod api {
    pub use murmur_api::*;
}

/// The comment & voting engine for every subject, shared by all users
pub struct Comments {
    store: Arc<dyn api::Store>,
    config: Config,
    locks: PairLocks,
}

impl Comments {
    pub fn new(store: Arc<dyn api::Store>, config: Config) -> Comments {
        Comments {
            store,
            config,
            locks: PairLocks::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use murmur_mock_server::MemStore;

    use crate::{
        api::{Comment, CommentId, Store, Subject, SubjectType, UserId, Uuid, VoteType},
        Comments, Config,
    };

    pub fn init_tracing() {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        }
    }

    pub fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    pub fn firm() -> Subject {
        Subject::new(SubjectType::PropFirm, "topstep")
    }

    pub fn engine(store: &Arc<MemStore>) -> Comments {
        init_tracing();
        Comments::new(store.clone(), Config::default())
    }

    /// Inserts a comment directly into the store, bypassing validation
    pub async fn seed(
        store: &MemStore,
        parent_id: Option<CommentId>,
        minutes_ago: i64,
        votes: &[VoteType],
    ) -> Comment {
        let mut c = Comment {
            id: CommentId::new(),
            subject: firm(),
            author_id: user(),
            body: String::from("seeded"),
            parent_id,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            edited_at: None,
            upvotes_count: 0,
            downvotes_count: 0,
        };
        for v in votes {
            match v {
                VoteType::Upvote => c.upvotes_count += 1,
                VoteType::Downvote => c.downvotes_count += 1,
            }
        }
        store.insert_comment(&c).await.unwrap();
        for v in votes {
            store.set_vote(c.id, user(), *v).await.unwrap();
        }
        c
    }
}
