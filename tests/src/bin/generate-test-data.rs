//! Prints SQL filling a murmur database with random threads, for manual testing

use std::collections::HashMap;

use chrono::{Duration, Utc};
use murmur_api::{SubjectType, VoteType};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 20;
const SUBJECTS_PER_TYPE: usize = 5;

const NUM_TOP_LEVEL: usize = 200;
const NUM_REPLIES: usize = 400;
const NUM_VOTES: usize = 2000;

const COMMENT_WORD_COUNT: usize = 25;
const MAX_AGE_MINUTES: i64 = 60 * 24 * 30;

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    if n == 0 {
        return;
    }
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn gen_comment_text(rng: &mut impl Rng) -> String {
    let words = rng.gen_range(1..COMMENT_WORD_COUNT);
    lipsum::lipsum_words_with_rng(&mut *rng, words).replace('\'', "''")
}

struct Row {
    id: Uuid,
    kind: SubjectType,
    subject_id: String,
    author: Uuid,
    parent: Option<Uuid>,
    minutes_ago: i64,
    body: String,
}

fn main() {
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    let subjects = SubjectType::ALL
        .into_iter()
        .flat_map(|k| (0..SUBJECTS_PER_TYPE).map(move |i| (k, format!("{k}-{i}"))))
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for _ in 0..NUM_TOP_LEVEL {
        let (kind, subject_id) = subjects.choose(&mut rng).expect("no subjects").clone();
        rows.push(Row {
            id: Uuid::new_v4(),
            kind,
            subject_id,
            author: *users.choose(&mut rng).expect("no users"),
            parent: None,
            minutes_ago: rng.gen_range(1..MAX_AGE_MINUTES),
            body: gen_comment_text(&mut rng),
        });
    }
    for _ in 0..NUM_REPLIES {
        let parent = &rows[rng.gen_range(0..NUM_TOP_LEVEL)];
        let reply = Row {
            id: Uuid::new_v4(),
            kind: parent.kind,
            subject_id: parent.subject_id.clone(),
            author: *users.choose(&mut rng).expect("no users"),
            parent: Some(parent.id),
            // replies are always younger than what they answer
            minutes_ago: rng.gen_range(0..parent.minutes_ago),
            body: gen_comment_text(&mut rng),
        };
        rows.push(reply);
    }

    // at most one vote per (comment, user), counters derived from it
    let mut votes = HashMap::new();
    for _ in 0..NUM_VOTES {
        let comment = rows[rng.gen_range(0..rows.len())].id;
        let user = *users.choose(&mut rng).expect("no users");
        let vote = match rng.gen_bool(0.7) {
            true => VoteType::Upvote,
            false => VoteType::Downvote,
        };
        votes.insert((comment, user), vote);
    }
    let mut counters: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for ((comment, _), vote) in votes.iter() {
        let c = counters.entry(*comment).or_default();
        match vote {
            VoteType::Upvote => c.0 += 1,
            VoteType::Downvote => c.1 += 1,
        }
    }

    gen_n_items("comments", rows.len(), |i| {
        let r = &rows[i];
        let (up, down) = counters.get(&r.id).copied().unwrap_or_default();
        format!(
            "('{}', '{}', '{}', '{}', '{}', {}, '{}', NULL, {}, {})",
            r.id,
            r.kind.collection(),
            r.subject_id,
            r.author,
            r.body,
            r.parent.map_or_else(|| String::from("NULL"), |p| format!("'{p}'")),
            (now - Duration::minutes(r.minutes_ago)).to_rfc3339(),
            up,
            down,
        )
    });

    let votes = votes.into_iter().collect::<Vec<_>>();
    gen_n_items("comment_votes", votes.len(), |i| {
        let ((comment, user), vote) = votes[i];
        format!("('{}', '{}', '{}')", comment, user, vote.as_str())
    });
}
