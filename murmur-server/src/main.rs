use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use murmur_client::{Comments, Config, OrphanPolicy};
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use db::PostgresStore;
use error::Error;
use extractors::AppState;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, structopt::StructOpt)]
#[structopt(name = "murmur-server", about = "Comment & voting server")]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "MURMUR_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Maximum length of a comment body, in characters
    #[structopt(long, default_value = "10000")]
    max_body_len: usize,

    /// Delete the replies of a top-level comment along with it, instead of
    /// keeping them as orphans
    #[structopt(long)]
    cascade_replies: bool,
}

impl Opt {
    fn config(&self) -> Config {
        Config {
            max_body_len: self.max_body_len,
            orphan_policy: match self.cascade_replies {
                true => OrphanPolicy::CascadeReplies,
                false => OrphanPolicy::Keep,
            },
        }
    }
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(store: Arc<dyn murmur_api::Store>, config: Config) -> Router {
    let state = AppState {
        comments: Arc::new(Comments::new(store, config)),
    };
    Router::new()
        .route(
            "/api/subjects/:kind/:id/comments",
            get(handlers::fetch_tree).post(handlers::create_comment),
        )
        .route("/api/comments/:id/replies", post(handlers::create_reply))
        .route("/api/comments/:id/edit", post(handlers::edit_comment))
        .route("/api/comments/:id/delete", post(handlers::delete_comment))
        .route("/api/comments/:id/vote", post(handlers::vote))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::from_args();
    let config = opt.config();
    tracing::info!(?config, "starting up");

    let pool = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("running pending migrations")?;

    let app = app(Arc::new(PostgresStore::new(pool)), config);

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
