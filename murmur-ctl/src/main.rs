use anyhow::{anyhow, Context};
use murmur_api::{
    Comment, CommentTree, CommentTreeNode, EditComment, NewComment, Removal, Subject,
    SubjectType, UserId, Uuid, VoteAction, VoteOutcome,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "MURMUR_HOST")]
    host: String,

    /// Act as this user, anonymously if unset
    #[structopt(short, long, env = "MURMUR_USER")]
    user: Option<Uuid>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Print the comment thread of a subject
    Tree {
        /// One of propfirm, news or blog
        kind: SubjectType,
        id: String,
    },

    /// Start a new thread on a subject
    Post {
        kind: SubjectType,
        id: String,
        body: String,
    },

    Reply {
        parent: Uuid,
        body: String,
    },

    Edit {
        comment: Uuid,
        body: String,
    },

    Delete {
        comment: Uuid,
    },

    /// Click a vote button, `up` or `down`
    Vote {
        comment: Uuid,
        action: VoteAction,
    },
}

struct Client {
    host: String,
    user: Option<UserId>,
    http: reqwest::Client,
}

impl Client {
    async fn send<Resp>(&self, req: reqwest::RequestBuilder) -> anyhow::Result<Resp>
    where
        Resp: for<'de> serde::Deserialize<'de>,
    {
        let req = match self.user {
            Some(user) => req.bearer_auth(user.0),
            None => req,
        };
        let resp = req.send().await.context("sending request to server")?;
        let status = resp.status();
        let body = resp.bytes().await.context("reading server response")?;
        if !status.is_success() {
            return Err(match murmur_api::Error::parse(&body) {
                Ok(err) => anyhow!(err),
                Err(_) => anyhow!("server answered {status}: {}", String::from_utf8_lossy(&body)),
            });
        }
        serde_json::from_slice(&body).context("parsing server response")
    }

    async fn get<Resp>(&self, path: &str) -> anyhow::Result<Resp>
    where
        Resp: for<'de> serde::Deserialize<'de>,
    {
        self.send(self.http.get(format!("{}{path}", self.host)))
            .await
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> anyhow::Result<Resp>
    where
        Req: serde::Serialize,
        Resp: for<'de> serde::Deserialize<'de>,
    {
        self.send(self.http.post(format!("{}{path}", self.host)).json(body))
            .await
    }
}

fn print_node(node: &CommentTreeNode, indent: usize) {
    let vote = match node.user_vote {
        Some(v) => format!(" (you: {v})"),
        None => String::new(),
    };
    let edited = match node.comment.edited_at {
        Some(_) => " [edited]",
        None => "",
    };
    println!(
        "{:indent$}[{:+}] {:?} {}{edited}{vote}",
        "",
        node.score(),
        node.comment.id.0,
        node.comment.body,
    );
    for r in node.replies.iter() {
        print_node(r, indent + 4);
    }
}

fn print_comment(c: &Comment) {
    println!("{} {}", c.id.0, c.body);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = Client {
        host: opt.host,
        user: opt.user.map(UserId),
        http: reqwest::Client::new(),
    };
    let comments = |s: &Subject| format!("/api/subjects/{}/{}/comments", s.kind, s.id);

    match opt.cmd {
        Command::Tree { kind, id } => {
            let tree: CommentTree = client.get(&comments(&Subject::new(kind, id))).await?;
            for root in tree.roots.iter() {
                print_node(root, 0);
            }
            println!("{} comments", tree.total_comments());
        }
        Command::Post { kind, id, body } => {
            let c: Comment = client
                .post(&comments(&Subject::new(kind, id)), &NewComment { body })
                .await?;
            print_comment(&c);
        }
        Command::Reply { parent, body } => {
            let c: Comment = client
                .post(
                    &format!("/api/comments/{}/replies", parent),
                    &NewComment { body },
                )
                .await?;
            print_comment(&c);
        }
        Command::Edit { comment, body } => {
            let c: Comment = client
                .post(
                    &format!("/api/comments/{}/edit", comment),
                    &EditComment { body },
                )
                .await?;
            print_comment(&c);
        }
        Command::Delete { comment } => {
            let r: Removal = client
                .post(&format!("/api/comments/{}/delete", comment), &())
                .await?;
            println!(
                "deleted {} with {} replies, {} votes cleared",
                r.comment.0,
                r.subtree.len(),
                r.votes_cleared
            );
        }
        Command::Vote { comment, action } => {
            let o: VoteOutcome = client
                .post(&format!("/api/comments/{}/vote", comment), &action)
                .await?;
            let vote = o.vote.map_or_else(|| String::from("none"), |v| v.to_string());
            println!("vote: {vote}, +{} -{} ({:+})", o.upvotes, o.downvotes, o.score());
        }
    }

    Ok(())
}
