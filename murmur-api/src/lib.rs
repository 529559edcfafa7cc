mod comment;
pub use comment::{Comment, CommentTree, CommentTreeNode, EditComment, NewComment, Removal};

mod error;
pub use error::{Error, ErrorKind};

mod store;
pub use store::{Frontend, Store};

mod subject;
pub use subject::{Subject, SubjectType};

mod vote;
pub use vote::{CounterDelta, Transition, VoteAction, VoteCommit, VoteOutcome, VoteType};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<chrono::Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    serde::Deserialize,
    serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn new() -> CommentId {
        CommentId(Uuid::new_v4())
    }

    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// Postgres text columns cannot hold NUL bytes, so every user-supplied string
/// goes through this before reaching a store
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
