use std::{collections::HashMap, str::FromStr};

use anyhow::Context;
use futures::TryStreamExt;
use murmur_api::{
    Comment, CommentId, CounterDelta, Store, Subject, SubjectType, Time, UserId, Uuid,
    VoteCommit, VoteType,
};
use sqlx::{postgres::PgRow, Connection, Row};

const COMMENT_COLUMNS: &str = "
    id, subject_type, subject_id, author_id, body, parent_id,
    created_at, edited_at, upvotes_count, downvotes_count
";

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    let subject_type = row
        .try_get::<String, _>("subject_type")
        .context("retrieving the subject_type field")?;
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        subject: Subject {
            kind: SubjectType::from_str(&subject_type)
                .with_context(|| format!("parsing subject type {subject_type:?}"))?,
            id: row
                .try_get("subject_id")
                .context("retrieving the subject_id field")?,
        },
        author_id: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        body: row.try_get("body").context("retrieving the body field")?,
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        edited_at: row
            .try_get("edited_at")
            .context("retrieving the edited_at field")?,
        upvotes_count: row
            .try_get("upvotes_count")
            .context("retrieving the upvotes_count field")?,
        downvotes_count: row
            .try_get("downvotes_count")
            .context("retrieving the downvotes_count field")?,
    })
}

fn vote_from_row(row: &PgRow) -> anyhow::Result<VoteType> {
    let raw = row
        .try_get::<String, _>("vote_type")
        .context("retrieving the vote_type field")?;
    VoteType::from_str(&raw)
}

async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
) -> anyhow::Result<Vec<Comment>> {
    let mut rows = query.fetch(conn);
    let mut res = Vec::new();
    while let Some(row) = rows.try_next().await.context("querying comments table")? {
        res.push(comment_from_row(&row)?);
    }
    Ok(res)
}

pub async fn list_top_level(
    conn: &mut sqlx::PgConnection,
    subject: &Subject,
) -> anyhow::Result<Vec<Comment>> {
    let sql = format!(
        "
            SELECT {COMMENT_COLUMNS}
                FROM comments
            WHERE subject_type = $1
                AND subject_id = $2
                AND parent_id IS NULL
            ORDER BY created_at DESC, id DESC
        "
    );
    fetch_comments(
        conn,
        sqlx::query(&sql)
            .bind(subject.kind.collection())
            .bind(&subject.id),
    )
    .await
}

pub async fn list_replies_of(
    conn: &mut sqlx::PgConnection,
    parents: &[CommentId],
) -> anyhow::Result<Vec<Comment>> {
    let parents = parents.iter().map(|p| p.0).collect::<Vec<Uuid>>();
    let sql = format!(
        "
            SELECT {COMMENT_COLUMNS}
                FROM comments
            WHERE parent_id = ANY($1)
            ORDER BY created_at ASC, id ASC
        "
    );
    fetch_comments(conn, sqlx::query(&sql).bind(parents)).await
}

pub async fn get_comment(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
    sqlx::query(&sql)
        .bind(id.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching comment {id:?}"))?
        .map(|row| comment_from_row(&row))
        .transpose()
}

pub async fn insert_comment(conn: &mut sqlx::PgConnection, c: &Comment) -> anyhow::Result<()> {
    sqlx::query(
        "
            INSERT INTO comments
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ",
    )
    .bind(c.id.0)
    .bind(c.subject.kind.collection())
    .bind(&c.subject.id)
    .bind(c.author_id.0)
    .bind(&c.body)
    .bind(c.parent_id.map(|p| p.0))
    .bind(c.created_at)
    .bind(c.edited_at)
    .bind(c.upvotes_count)
    .bind(c.downvotes_count)
    .execute(conn)
    .await
    .with_context(|| format!("inserting comment {:?}", c.id))?;
    Ok(())
}

pub async fn update_comment_body(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
    body: &str,
    edited_at: Time,
) -> anyhow::Result<Option<Comment>> {
    let sql = format!(
        "
            UPDATE comments
                SET body = $2, edited_at = $3
            WHERE id = $1
            RETURNING {COMMENT_COLUMNS}
        "
    );
    sqlx::query(&sql)
        .bind(id.0)
        .bind(body)
        .bind(edited_at)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("updating body of comment {id:?}"))?
        .map(|row| comment_from_row(&row))
        .transpose()
}

/// Fails on the foreign key if votes still reference the comment
pub async fn delete_comment(conn: &mut sqlx::PgConnection, id: CommentId) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(id.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting comment {id:?}"))?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_vote(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    user: UserId,
) -> anyhow::Result<Option<VoteType>> {
    sqlx::query("SELECT vote_type FROM comment_votes WHERE comment_id = $1 AND user_id = $2")
        .bind(comment.0)
        .bind(user.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("fetching vote of {user:?} on {comment:?}"))?
        .map(|row| vote_from_row(&row))
        .transpose()
}

pub async fn get_votes_for_user(
    conn: &mut sqlx::PgConnection,
    comments: &[CommentId],
    user: UserId,
) -> anyhow::Result<HashMap<CommentId, VoteType>> {
    let comments = comments.iter().map(|c| c.0).collect::<Vec<Uuid>>();
    let mut rows = sqlx::query(
        "
            SELECT comment_id, vote_type
                FROM comment_votes
            WHERE user_id = $1
                AND comment_id = ANY($2)
        ",
    )
    .bind(user.0)
    .bind(comments)
    .fetch(conn);
    let mut res = HashMap::new();
    while let Some(row) = rows
        .try_next()
        .await
        .context("querying comment_votes table")?
    {
        res.insert(
            CommentId(
                row.try_get("comment_id")
                    .context("retrieving the comment_id field")?,
            ),
            vote_from_row(&row)?,
        );
    }
    Ok(res)
}

pub async fn set_vote(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    user: UserId,
    vote: VoteType,
) -> anyhow::Result<()> {
    sqlx::query(
        "
            INSERT INTO comment_votes
            VALUES ($1, $2, $3)
            ON CONFLICT (comment_id, user_id)
            DO UPDATE SET vote_type = EXCLUDED.vote_type
        ",
    )
    .bind(comment.0)
    .bind(user.0)
    .bind(vote.as_str())
    .execute(conn)
    .await
    .with_context(|| format!("setting vote of {user:?} on {comment:?}"))?;
    Ok(())
}

pub async fn clear_vote(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    user: UserId,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM comment_votes WHERE comment_id = $1 AND user_id = $2")
        .bind(comment.0)
        .bind(user.0)
        .execute(conn)
        .await
        .with_context(|| format!("clearing vote of {user:?} on {comment:?}"))?;
    Ok(())
}

/// Empties the ledger of `comment` and zeroes its counters under the same
/// row lock as `commit_vote`, so a failed delete afterwards leaves them in step
pub async fn clear_all_votes_for_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<u64> {
    let mut tx = conn.begin().await.context("starting vote clearing transaction")?;

    sqlx::query("SELECT id FROM comments WHERE id = $1 FOR UPDATE")
        .bind(comment.0)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("locking comment {comment:?}"))?;

    let removed = sqlx::query("DELETE FROM comment_votes WHERE comment_id = $1")
        .bind(comment.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("clearing votes on {comment:?}"))?
        .rows_affected();

    sqlx::query("UPDATE comments SET upvotes_count = 0, downvotes_count = 0 WHERE id = $1")
        .bind(comment.0)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("zeroing counters of {comment:?}"))?;

    tx.commit().await.context("committing vote clearing transaction")?;
    Ok(removed)
}

/// Locks the comment row first, so that every vote on a comment goes through
/// one at a time and the ledger check below cannot be raced
pub async fn commit_vote(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    user: UserId,
    expected: Option<VoteType>,
    target: Option<VoteType>,
    delta: CounterDelta,
) -> anyhow::Result<VoteCommit> {
    let mut tx = conn.begin().await.context("starting vote transaction")?;

    let locked = sqlx::query("SELECT id FROM comments WHERE id = $1 FOR UPDATE")
        .bind(comment.0)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("locking comment {comment:?}"))?;
    if locked.is_none() {
        return Ok(VoteCommit::MissingComment);
    }

    let actual = get_vote(&mut *tx, comment, user).await?;
    if actual != expected {
        return Ok(VoteCommit::Stale { actual });
    }

    match target {
        Some(v) => set_vote(&mut *tx, comment, user, v).await?,
        None => clear_vote(&mut *tx, comment, user).await?,
    }

    let row = sqlx::query(
        "
            UPDATE comments
                SET upvotes_count = GREATEST(upvotes_count + $2, 0),
                    downvotes_count = GREATEST(downvotes_count + $3, 0)
            WHERE id = $1
            RETURNING upvotes_count, downvotes_count
        ",
    )
    .bind(comment.0)
    .bind(delta.upvotes)
    .bind(delta.downvotes)
    .fetch_one(&mut *tx)
    .await
    .with_context(|| format!("updating counters of {comment:?}"))?;
    let upvotes = row
        .try_get("upvotes_count")
        .context("retrieving the upvotes_count field")?;
    let downvotes = row
        .try_get("downvotes_count")
        .context("retrieving the downvotes_count field")?;

    tx.commit().await.context("committing vote transaction")?;
    Ok(VoteCommit::Committed { upvotes, downvotes })
}

/// Store over a postgres pool, one pooled connection per operation
#[derive(Clone)]
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> PostgresStore {
        PostgresStore { pool }
    }

    async fn acquire(&self) -> anyhow::Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool.acquire().await.context("acquiring db connection")
    }
}

#[axum::async_trait]
impl Store for PostgresStore {
    async fn list_top_level(&self, subject: &Subject) -> anyhow::Result<Vec<Comment>> {
        list_top_level(&mut *self.acquire().await?, subject).await
    }

    async fn list_replies(&self, parent: CommentId) -> anyhow::Result<Vec<Comment>> {
        list_replies_of(&mut *self.acquire().await?, &[parent]).await
    }

    async fn list_replies_of(&self, parents: &[CommentId]) -> anyhow::Result<Vec<Comment>> {
        list_replies_of(&mut *self.acquire().await?, parents).await
    }

    async fn get_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        get_comment(&mut *self.acquire().await?, id).await
    }

    async fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        insert_comment(&mut *self.acquire().await?, comment).await
    }

    async fn update_comment_body(
        &self,
        id: CommentId,
        body: &str,
        edited_at: Time,
    ) -> anyhow::Result<Option<Comment>> {
        update_comment_body(&mut *self.acquire().await?, id, body, edited_at).await
    }

    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<bool> {
        delete_comment(&mut *self.acquire().await?, id).await
    }

    async fn get_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<Option<VoteType>> {
        get_vote(&mut *self.acquire().await?, comment, user).await
    }

    async fn get_votes_for_user(
        &self,
        comments: &[CommentId],
        user: UserId,
    ) -> anyhow::Result<HashMap<CommentId, VoteType>> {
        get_votes_for_user(&mut *self.acquire().await?, comments, user).await
    }

    async fn set_vote(
        &self,
        comment: CommentId,
        user: UserId,
        vote: VoteType,
    ) -> anyhow::Result<()> {
        set_vote(&mut *self.acquire().await?, comment, user, vote).await
    }

    async fn clear_vote(&self, comment: CommentId, user: UserId) -> anyhow::Result<()> {
        clear_vote(&mut *self.acquire().await?, comment, user).await
    }

    async fn clear_all_votes_for_comment(&self, comment: CommentId) -> anyhow::Result<u64> {
        clear_all_votes_for_comment(&mut *self.acquire().await?, comment).await
    }

    async fn commit_vote(
        &self,
        comment: CommentId,
        user: UserId,
        expected: Option<VoteType>,
        target: Option<VoteType>,
        delta: CounterDelta,
    ) -> anyhow::Result<VoteCommit> {
        commit_vote(
            &mut *self.acquire().await?,
            comment,
            user,
            expected,
            target,
            delta,
        )
        .await
    }
}
