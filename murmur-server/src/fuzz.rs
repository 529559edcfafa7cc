#![cfg(test)]

use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use murmur_api::{
    Comment, CommentId, CommentTree, EditComment, Error as ApiError, NewComment, Removal,
    SubjectType, UserId, Uuid, VoteAction, VoteOutcome, VoteType,
};
use murmur_mock_server::MemStore;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path, sync::Arc};
use tower::{Service, ServiceExt};
use bolero::generator::TypeGenerator;

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    runtime.map(|r| postgresfixture::cluster::Cluster::new(data, r))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                let _ = tracing_subscriber::fmt().with_test_writer().try_init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let Some(cluster) = build_pg_cluster(datadir_path) else {
                eprintln!("postgresql is not installed in path, skipping {}", stringify!($name));
                return;
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_type::<$typ>()
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_actor_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = Actor::from_request_parts(&mut req, &()).await;
        match res {
            Ok(Actor(Some(_))) => (),
            Ok(Actor(None)) => panic!("header was present but no actor was extracted"),
            Err(Error::Api(ApiError::NotAuthenticated)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!(
                r#"
                    Failed parsing resp body!

                    The error is the following:
                    ---
                    {err}
                    ---

                    Response body is:
                    ---
                    {body:?}
                    ---

                    Request was:
                    ---
                    {req_body:?}
                    ---
                "#
            )
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    user: Option<UserId>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match user {
        Some(user) => req.header(http::header::AUTHORIZATION, format!("bearer {}", user.0)),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn mem_app() -> (Router, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    (app(store.clone(), Config::default()), store)
}

fn user() -> UserId {
    UserId(Uuid::new_v4())
}

const TREE: &str = "/api/subjects/propfirm/topstep/comments";

async fn post(app: &mut Router, user: Option<UserId>, body: &str) -> Result<Comment, ApiError> {
    let body = NewComment {
        body: String::from(body),
    };
    run_on_app(app, "POST", TREE, user, &body).await
}

async fn vote(
    app: &mut Router,
    user: Option<UserId>,
    comment: CommentId,
    action: VoteAction,
) -> Result<VoteOutcome, ApiError> {
    let uri = format!("/api/comments/{}/vote", comment.0);
    run_on_app(app, "POST", &uri, user, &action).await
}

#[tokio::test]
async fn thread_over_http() {
    let (mut app, store) = mem_app();
    let (alice, bob) = (user(), user());

    let top = post(&mut app, Some(alice), "Fast payouts").await.unwrap();
    let reply: Comment = run_on_app(
        &mut app,
        "POST",
        &format!("/api/comments/{}/replies", top.id.0),
        Some(bob),
        &NewComment {
            body: String::from("Not for me"),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.parent_id, Some(top.id));

    let nested: Result<Comment, _> = run_on_app(
        &mut app,
        "POST",
        &format!("/api/comments/{}/replies", reply.id.0),
        Some(alice),
        &NewComment {
            body: String::from("why?"),
        },
    )
    .await;
    assert_eq!(nested, Err(ApiError::ReplyTooDeep(reply.id)));

    let o = vote(&mut app, Some(bob), top.id, VoteAction::ClickUpvote)
        .await
        .unwrap();
    assert_eq!((o.vote, o.upvotes, o.downvotes), (Some(VoteType::Upvote), 1, 0));

    let tree: CommentTree = run_on_app(&mut app, "GET", TREE, Some(bob), &())
        .await
        .unwrap();
    assert_eq!(tree.total_comments(), 2);
    assert_eq!(tree.roots[0].user_vote, Some(VoteType::Upvote));
    assert_eq!(tree.roots[0].replies[0].comment.id, reply.id);

    let anonymous: CommentTree = run_on_app(&mut app, "GET", TREE, None, &()).await.unwrap();
    assert_eq!(anonymous.roots[0].user_vote, None);
    store.test_check_consistency().unwrap();
}

#[tokio::test]
async fn anonymous_mutations_are_unauthorized() {
    let (mut app, store) = mem_app();
    let c = post(&mut app, Some(user()), "hello").await.unwrap();

    assert_eq!(
        post(&mut app, None, "hi").await,
        Err(ApiError::NotAuthenticated)
    );
    assert_eq!(
        vote(&mut app, None, c.id, VoteAction::ClickUpvote).await,
        Err(ApiError::NotAuthenticated)
    );
    assert_eq!(store.test_num_vote_rows(), 0);

    let req = request::Builder::new()
        .method("POST")
        .uri(format!("/api/comments/{}/vote", c.id.0))
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::AUTHORIZATION, "bearer not-a-uuid")
        .body(axum::body::Body::from(r#""ClickUpvote""#))
        .expect("building request");
    let resp = app.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn edit_and_delete_over_http() {
    let (mut app, store) = mem_app();
    let author = user();
    let c = post(&mut app, Some(author), "v1").await.unwrap();
    let edit_uri = format!("/api/comments/{}/edit", c.id.0);
    let delete_uri = format!("/api/comments/{}/delete", c.id.0);
    let edit = EditComment {
        body: String::from("v2"),
    };

    let res: Result<Comment, _> =
        run_on_app(&mut app, "POST", &edit_uri, Some(user()), &edit).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
    let edited: Comment = run_on_app(&mut app, "POST", &edit_uri, Some(author), &edit)
        .await
        .unwrap();
    assert_eq!(edited.body, "v2");
    assert!(edited.edited_at.is_some());

    vote(&mut app, Some(user()), c.id, VoteAction::ClickDownvote)
        .await
        .unwrap();
    let removal: Removal = run_on_app(&mut app, "POST", &delete_uri, Some(author), &())
        .await
        .unwrap();
    assert_eq!(removal.votes_cleared, 1);
    assert_eq!(store.test_num_comments(), 0);
    assert_eq!(store.test_num_vote_rows(), 0);

    let again: Result<Removal, _> =
        run_on_app(&mut app, "POST", &delete_uri, Some(author), &()).await;
    assert_eq!(again, Err(ApiError::UnknownComment(c.id)));
}

#[tokio::test]
async fn unknown_subject_and_bad_bodies_are_rejected() {
    let (mut app, _) = mem_app();
    let res: Result<CommentTree, _> =
        run_on_app(&mut app, "GET", "/api/subjects/forum/x/comments", None, &()).await;
    assert_eq!(
        res,
        Err(ApiError::UnknownSubjectType(String::from("forum")))
    );
    assert_eq!(
        post(&mut app, Some(user()), "  ").await,
        Err(ApiError::EmptyBody)
    );
}

#[tokio::test]
async fn store_failures_are_service_unavailable() {
    let (mut app, store) = mem_app();
    store.fail_next(murmur_mock_server::FailPoint::InsertComment);
    assert_eq!(
        post(&mut app, Some(user()), "hello").await,
        Err(ApiError::StoreUnavailable)
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

const FUZZ_USERS: usize = 3;
const MAX_FUZZ_OPS: usize = 64;

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Post {
        user: Option<u8>,
        subject: SubjectType,
        body: String,
    },
    Reply {
        user: Option<u8>,
        parent: usize,
        body: String,
    },
    Edit {
        user: Option<u8>,
        comment: usize,
        body: String,
    },
    Delete {
        user: Option<u8>,
        comment: usize,
    },
    Vote {
        user: Option<u8>,
        comment: usize,
        action: VoteAction,
    },
    Tree {
        user: Option<u8>,
        subject: SubjectType,
    },
}

/// A comment stripped of what differs between two stores fed the same
/// operations: ids and timestamps
#[derive(Debug, PartialEq)]
struct Shape {
    author: UserId,
    body: String,
    top_level: bool,
    edited: bool,
    upvotes: i64,
    downvotes: i64,
    user_vote: Option<VoteType>,
    replies: Vec<Shape>,
}

impl Shape {
    fn of(c: &Comment) -> Shape {
        Shape {
            author: c.author_id,
            body: c.body.clone(),
            top_level: c.is_top_level(),
            edited: c.edited_at.is_some(),
            upvotes: c.upvotes_count,
            downvotes: c.downvotes_count,
            user_vote: None,
            replies: Vec::new(),
        }
    }

    fn of_tree(t: &CommentTree) -> Vec<Shape> {
        fn node(n: &murmur_api::CommentTreeNode) -> Shape {
            Shape {
                user_vote: n.user_vote,
                replies: n.replies.iter().map(node).collect(),
                ..Shape::of(&n.comment)
            }
        }
        t.roots.iter().map(node).collect()
    }
}

fn strip_ids(err: ApiError) -> ApiError {
    match err {
        ApiError::UnknownComment(_) => ApiError::UnknownComment(CommentId::stub()),
        ApiError::ReplyTooDeep(_) => ApiError::ReplyTooDeep(CommentId::stub()),
        ApiError::Conflict(_) => ApiError::Conflict(String::new()),
        err => err,
    }
}

fn compare<T, U>(
    name: &str,
    app_res: Result<T, ApiError>,
    mock_res: Result<T, ApiError>,
    f: impl Fn(&T) -> U,
) where
    U: Debug + PartialEq,
{
    let app_res = app_res.as_ref().map(&f).map_err(|e| strip_ids(e.clone()));
    let mock_res = mock_res.as_ref().map(&f).map_err(|e| strip_ids(e.clone()));
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

/// Runs every operation both over http against postgres and directly against
/// an in-memory engine, and checks they agree
struct ComparativeFuzzer {
    users: Vec<UserId>,
    app: Router,
    mock: Comments,
    mock_store: Arc<MemStore>,

    // (app id, mock id) of every comment created so far, deleted ones included
    comments: Vec<(CommentId, CommentId)>,
}

impl ComparativeFuzzer {
    fn new(pool: sqlx::PgPool) -> ComparativeFuzzer {
        let mock_store = Arc::new(MemStore::new());
        ComparativeFuzzer {
            users: (0..FUZZ_USERS).map(|_| user()).collect(),
            app: app(Arc::new(PostgresStore::new(pool)), Config::default()),
            mock: Comments::new(mock_store.clone(), Config::default()),
            mock_store,
            comments: Vec::new(),
        }
    }

    fn user(&self, u: Option<u8>) -> Option<UserId> {
        u.map(|u| self.users[u as usize % self.users.len()])
    }

    fn comment(&self, fuzz_id: usize) -> Option<(CommentId, CommentId)> {
        resize_int(fuzz_id, ..self.comments.len()).map(|i| self.comments[i])
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::Post {
                user,
                subject,
                body,
            } => {
                let user = self.user(user);
                let uri = format!("/api/subjects/{subject}/fuzz/comments");
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &uri,
                    user,
                    &NewComment { body: body.clone() },
                )
                .await;
                let mock_res = self
                    .mock
                    .create_comment(user, &murmur_api::Subject::new(subject, "fuzz"), &body)
                    .await
                    .map_err(|e| e.into_api());
                if let (Ok(a), Ok(m)) = (&app_res, &mock_res) {
                    self.comments.push((a.id, m.id));
                }
                compare("Post", app_res, mock_res, Shape::of);
            }
            FuzzOp::Reply { user, parent, body } => {
                let Some((app_id, mock_id)) = self.comment(parent) else {
                    return;
                };
                let user = self.user(user);
                let uri = format!("/api/comments/{}/replies", app_id.0);
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &uri,
                    user,
                    &NewComment { body: body.clone() },
                )
                .await;
                let mock_res = self
                    .mock
                    .create_reply(user, mock_id, &body)
                    .await
                    .map_err(|e| e.into_api());
                if let (Ok(a), Ok(m)) = (&app_res, &mock_res) {
                    self.comments.push((a.id, m.id));
                }
                compare("Reply", app_res, mock_res, Shape::of);
            }
            FuzzOp::Edit {
                user,
                comment,
                body,
            } => {
                let Some((app_id, mock_id)) = self.comment(comment) else {
                    return;
                };
                let user = self.user(user);
                let uri = format!("/api/comments/{}/edit", app_id.0);
                compare(
                    "Edit",
                    run_on_app(
                        &mut self.app,
                        "POST",
                        &uri,
                        user,
                        &EditComment { body: body.clone() },
                    )
                    .await,
                    self.mock
                        .edit_comment(user, mock_id, &body)
                        .await
                        .map_err(|e| e.into_api()),
                    Shape::of,
                );
            }
            FuzzOp::Delete { user, comment } => {
                let Some((app_id, mock_id)) = self.comment(comment) else {
                    return;
                };
                let user = self.user(user);
                let uri = format!("/api/comments/{}/delete", app_id.0);
                compare(
                    "Delete",
                    run_on_app(&mut self.app, "POST", &uri, user, &()).await,
                    self.mock
                        .delete_comment(user, mock_id)
                        .await
                        .map_err(|e| e.into_api()),
                    |r: &Removal| (r.subtree.len(), r.votes_cleared),
                );
            }
            FuzzOp::Vote {
                user,
                comment,
                action,
            } => {
                let Some((app_id, mock_id)) = self.comment(comment) else {
                    return;
                };
                let user = self.user(user);
                compare(
                    "Vote",
                    vote(&mut self.app, user, app_id, action).await,
                    self.mock
                        .vote(user, mock_id, action)
                        .await
                        .map_err(|e| e.into_api()),
                    |o: &VoteOutcome| (o.vote, o.upvotes, o.downvotes),
                );
            }
            FuzzOp::Tree { user, subject } => {
                let user = self.user(user);
                let uri = format!("/api/subjects/{subject}/fuzz/comments");
                compare(
                    "Tree",
                    run_on_app(&mut self.app, "GET", &uri, user, &()).await,
                    self.mock
                        .build_tree(&murmur_api::Subject::new(subject, "fuzz"), user)
                        .await
                        .map_err(|e| e.into_api()),
                    Shape::of_tree,
                );
            }
        }
        self.mock_store
            .test_check_consistency()
            .expect("mock store went inconsistent");
    }
}

do_sqlx_test!(
    compare_with_mock,
    Vec<FuzzOp>,
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool);
        for op in test.into_iter().take(MAX_FUZZ_OPS) {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
struct Click {
    user: u8,
    action: VoteAction,
}

async fn check_counters_match_ledger(pool: &sqlx::PgPool) {
    let mismatches: i64 = sqlx::query_scalar(
        "
            SELECT COUNT(*)
                FROM comments c
            WHERE c.upvotes_count != (
                SELECT COUNT(*) FROM comment_votes v
                WHERE v.comment_id = c.id AND v.vote_type = 'upvote'
            ) OR c.downvotes_count != (
                SELECT COUNT(*) FROM comment_votes v
                WHERE v.comment_id = c.id AND v.vote_type = 'downvote'
            )
        ",
    )
    .fetch_one(pool)
    .await
    .expect("counting counter mismatches");
    assert_eq!(mismatches, 0, "counters drifted from the ledger");
}

do_sqlx_test!(
    concurrent_votes_stay_consistent,
    Vec<Click>,
    |pool: sqlx::PgPool, clicks: Vec<Click>| async move {
        let users = (0..FUZZ_USERS).map(|_| user()).collect::<Vec<_>>();
        let store = Arc::new(PostgresStore::new(pool.clone()));
        let comments = Comments::new(store.clone(), Config::default());
        let c = comments
            .create_comment(
                Some(users[0]),
                &murmur_api::Subject::new(SubjectType::News, "rates"),
                "racing",
            )
            .await
            .expect("creating comment");
        let votes = clicks.iter().take(MAX_FUZZ_OPS).map(|click| {
            comments.vote(
                Some(users[click.user as usize % users.len()]),
                c.id,
                click.action,
            )
        });
        for res in futures::future::join_all(votes).await {
            res.expect("vote failed");
        }
        check_counters_match_ledger(&pool).await;
    }
);
