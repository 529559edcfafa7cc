use std::collections::BTreeMap;

use crate::api::{CommentId, CommentTree, VoteAction, VoteOutcome, VoteType};

/// What one viewer currently sees for one comment's vote buttons
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CachedVote {
    pub vote: Option<VoteType>,
    pub upvotes: i64,
    pub downvotes: i64,

    /// Number of clicks sent to the store and not answered yet
    pub pending: u32,
}

impl CachedVote {
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

/// Handle on one optimistic click, redeemed by `confirm` or `rollback`
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ClickTicket(u64);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
struct Entry {
    /// Last state the store vouched for, `pending` always 0
    confirmed: CachedVote,
    in_flight: BTreeMap<ClickTicket, VoteAction>,
}

impl Entry {
    fn settled(confirmed: CachedVote) -> Entry {
        Entry {
            confirmed: CachedVote {
                pending: 0,
                ..confirmed
            },
            in_flight: BTreeMap::new(),
        }
    }

    /// Confirmed state with the unanswered clicks replayed on top, in click order
    fn shown(&self) -> CachedVote {
        let mut res = self
            .in_flight
            .values()
            .fold(self.confirmed, |e, a| VoteCache::reduce(e, *a));
        res.pending = self.in_flight.len() as u32;
        res
    }
}

/// Client-side view state of one viewer, keyed by comment.
///
/// Entries are seeded from freshly built trees, optimistically updated on
/// click, then either confirmed with the store's answer or rolled back.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteCache {
    entries: BTreeMap<CommentId, Entry>,
    next_ticket: u64,
}

impl VoteCache {
    pub fn new() -> VoteCache {
        VoteCache::default()
    }

    pub fn get(&self, comment: CommentId) -> Option<CachedVote> {
        self.entries.get(&comment).map(Entry::shown)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// What the buttons should show right after `action`, before the store answers
    pub fn reduce(entry: CachedVote, action: VoteAction) -> CachedVote {
        let t = action.apply_to(entry.vote);
        let (upvotes, downvotes) = t.delta.apply(entry.upvotes, entry.downvotes);
        CachedVote {
            vote: t.to,
            upvotes,
            downvotes,
            pending: entry.pending,
        }
    }

    /// Takes in server state from a freshly built tree. Entries with clicks
    /// in flight are left alone: their answer will overwrite them anyway.
    pub fn absorb_tree(&mut self, tree: &CommentTree) {
        for n in tree.nodes() {
            let fresh = CachedVote {
                vote: n.user_vote,
                upvotes: n.comment.upvotes_count,
                downvotes: n.comment.downvotes_count,
                pending: 0,
            };
            match self.entries.get(&n.comment.id) {
                Some(e) if !e.in_flight.is_empty() => (),
                _ => {
                    self.entries.insert(n.comment.id, Entry::settled(fresh));
                }
            }
        }
    }

    /// Applies `action` optimistically. Comments never seen in a tree are not
    /// touched and yield None.
    pub fn begin(&mut self, comment: CommentId, action: VoteAction) -> Option<ClickTicket> {
        let entry = self.entries.get_mut(&comment)?;
        let ticket = ClickTicket(self.next_ticket);
        self.next_ticket += 1;
        let before = entry.shown();
        entry.in_flight.insert(ticket, action);
        tracing::trace!(?comment, ?before, after = ?entry.shown(), "optimistic vote");
        Some(ticket)
    }

    /// Takes the store's answer as the new confirmed state, keeping the
    /// other clicks still in flight on top of it
    pub fn confirm(&mut self, outcome: &VoteOutcome, ticket: Option<ClickTicket>) {
        let confirmed = CachedVote {
            vote: outcome.vote,
            upvotes: outcome.upvotes,
            downvotes: outcome.downvotes,
            pending: 0,
        };
        let entry = self
            .entries
            .entry(outcome.comment)
            .or_insert_with(|| Entry::settled(confirmed));
        entry.confirmed = confirmed;
        if let Some(t) = ticket {
            entry.in_flight.remove(&t);
        }
    }

    /// Drops a failed click: the buttons fall back to the last confirmed
    /// state plus whatever else is still in flight
    pub fn rollback(&mut self, comment: CommentId, ticket: ClickTicket) {
        if let Some(entry) = self.entries.get_mut(&comment) {
            entry.in_flight.remove(&ticket);
        }
    }

    pub fn forget(&mut self, comments: impl IntoIterator<Item = CommentId>) {
        for c in comments {
            self.entries.remove(&c);
        }
    }

    /// Makes `tree` show what the viewer sees, in-flight clicks included
    pub fn overlay(&self, tree: &mut CommentTree) {
        tree.for_each_node_mut(|n| {
            if let Some(e) = self.get(n.comment.id) {
                n.user_vote = e.vote;
                n.comment.upvotes_count = e.upvotes;
                n.comment.downvotes_count = e.downvotes;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::VoteAction::*;

    fn entry(vote: Option<VoteType>, upvotes: i64, downvotes: i64) -> CachedVote {
        CachedVote {
            vote,
            upvotes,
            downvotes,
            pending: 0,
        }
    }

    #[test]
    fn reducer_follows_transition_table() {
        assert_eq!(
            VoteCache::reduce(entry(None, 3, 1), ClickUpvote),
            entry(Some(VoteType::Upvote), 4, 1)
        );
        assert_eq!(
            VoteCache::reduce(entry(Some(VoteType::Downvote), 5, 2), ClickUpvote),
            entry(Some(VoteType::Upvote), 6, 1)
        );
        assert_eq!(
            VoteCache::reduce(entry(Some(VoteType::Upvote), 4, 1), ClickUpvote),
            entry(None, 3, 1)
        );
    }

    #[test]
    fn reducer_never_goes_negative() {
        bolero::check!()
            .with_type::<(Option<VoteType>, u8, u8, Vec<VoteAction>)>()
            .cloned()
            .for_each(|(vote, up, down, actions)| {
                let mut e = entry(vote, up as i64, down as i64);
                for a in actions {
                    e = VoteCache::reduce(e, a);
                    assert!(e.upvotes >= 0 && e.downvotes >= 0, "{e:?}");
                }
            });
    }

    fn seeded(c: CommentId, e: CachedVote) -> VoteCache {
        let mut cache = VoteCache::new();
        cache.entries.insert(c, Entry::settled(e));
        cache
    }

    #[test]
    fn begin_then_rollback_restores() {
        let c = CommentId::new();
        let mut cache = VoteCache::new();
        assert_eq!(cache.begin(c, ClickUpvote), None);
        let mut cache = seeded(c, entry(None, 3, 1));

        let ticket = cache.begin(c, ClickDownvote).unwrap();
        assert_eq!(cache.get(c).unwrap().vote, Some(VoteType::Downvote));
        assert_eq!(cache.get(c).unwrap().pending, 1);
        cache.rollback(c, ticket);
        assert_eq!(cache.get(c), Some(entry(None, 3, 1)));
    }

    #[test]
    fn confirm_takes_server_truth() {
        let c = CommentId::new();
        let mut cache = seeded(c, entry(None, 3, 1));
        let ticket = cache.begin(c, ClickUpvote);
        // someone else upvoted in the meantime
        cache.confirm(
            &VoteOutcome {
                comment: c,
                vote: Some(VoteType::Upvote),
                upvotes: 5,
                downvotes: 1,
            },
            ticket,
        );
        assert_eq!(cache.get(c), Some(entry(Some(VoteType::Upvote), 5, 1)));
    }

    #[test]
    fn rollback_after_a_newer_confirm_keeps_server_truth() {
        let c = CommentId::new();
        let mut cache = seeded(c, entry(None, 3, 0));
        let first = cache.begin(c, ClickUpvote);
        let second = cache.begin(c, ClickDownvote).unwrap();
        assert_eq!(
            cache.get(c).unwrap(),
            CachedVote {
                pending: 2,
                ..entry(Some(VoteType::Downvote), 3, 1)
            }
        );

        // another viewer upvoted before the first click landed
        cache.confirm(
            &VoteOutcome {
                comment: c,
                vote: Some(VoteType::Upvote),
                upvotes: 5,
                downvotes: 0,
            },
            first,
        );
        cache.rollback(c, second);
        assert_eq!(cache.get(c), Some(entry(Some(VoteType::Upvote), 5, 0)));
    }

    #[test]
    fn rollback_replays_remaining_clicks() {
        let c = CommentId::new();
        let mut cache = seeded(c, entry(None, 0, 0));
        let first = cache.begin(c, ClickUpvote).unwrap();
        cache.begin(c, ClickUpvote).unwrap();
        cache.rollback(c, first);
        assert_eq!(
            cache.get(c).unwrap(),
            CachedVote {
                pending: 1,
                ..entry(Some(VoteType::Upvote), 1, 0)
            }
        );
    }

    #[test]
    fn survives_serialization() {
        let c = CommentId::new();
        let mut cache = seeded(c, entry(Some(VoteType::Upvote), 1, 0));
        cache
            .entries
            .insert(CommentId::new(), Entry::settled(entry(None, 0, 7)));
        cache.begin(c, ClickDownvote);
        let json = serde_json::to_string(&cache).unwrap();
        assert_eq!(serde_json::from_str::<VoteCache>(&json).unwrap(), cache);
    }
}
