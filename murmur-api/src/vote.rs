use bolero::generator::TypeGenerator;
use std::{fmt, str::FromStr};

use anyhow::anyhow;

use crate::{CommentId, Error};

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::Upvote => "upvote",
            VoteType::Downvote => "downvote",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<VoteType> {
        match s {
            "upvote" => Ok(VoteType::Upvote),
            "downvote" => Ok(VoteType::Downvote),
            _ => Err(anyhow!("unknown vote type {s:?}")),
        }
    }
}

/// One click on one of the two vote buttons of a comment
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
pub enum VoteAction {
    ClickUpvote,
    ClickDownvote,
}

impl VoteAction {
    pub fn button(self) -> VoteType {
        match self {
            VoteAction::ClickUpvote => VoteType::Upvote,
            VoteAction::ClickDownvote => VoteType::Downvote,
        }
    }

    /// Clicking the active button removes the vote, clicking the other one
    /// flips it, clicking anything while not voted casts a vote.
    pub fn apply_to(self, current: Option<VoteType>) -> Transition {
        let clicked = self.button();
        let to = match current {
            Some(v) if v == clicked => None,
            _ => Some(clicked),
        };
        Transition {
            from: current,
            to,
            delta: CounterDelta::between(current, to),
        }
    }
}

impl FromStr for VoteAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<VoteAction, Error> {
        match s {
            "up" | "upvote" => Ok(VoteAction::ClickUpvote),
            "down" | "downvote" => Ok(VoteAction::ClickDownvote),
            _ => Err(Error::UnknownVoteAction(String::from(s))),
        }
    }
}

/// Change to apply to a comment's (upvotes, downvotes) counters
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CounterDelta {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl CounterDelta {
    pub fn between(from: Option<VoteType>, to: Option<VoteType>) -> CounterDelta {
        let mut delta = CounterDelta::default();
        for (vote, sign) in [(from, -1), (to, 1)] {
            match vote {
                Some(VoteType::Upvote) => delta.upvotes += sign,
                Some(VoteType::Downvote) => delta.downvotes += sign,
                None => (),
            }
        }
        delta
    }

    /// Counters never go below zero
    pub fn apply(self, upvotes: i64, downvotes: i64) -> (i64, i64) {
        (
            (upvotes + self.upvotes).max(0),
            (downvotes + self.downvotes).max(0),
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: Option<VoteType>,
    pub to: Option<VoteType>,
    pub delta: CounterDelta,
}

/// Result of the store's atomic conditional vote commit
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteCommit {
    Committed { upvotes: i64, downvotes: i64 },

    /// The ledger row no longer matched the expected state; nothing was written
    Stale { actual: Option<VoteType> },

    MissingComment,
}

/// Server truth for one (comment, user) pair after a vote was committed
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteOutcome {
    pub comment: CommentId,
    pub vote: Option<VoteType>,
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteOutcome {
    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VoteAction::*;
    use VoteType::*;

    fn delta(upvotes: i64, downvotes: i64) -> CounterDelta {
        CounterDelta { upvotes, downvotes }
    }

    #[test]
    fn transition_table() {
        let table = [
            (None, ClickUpvote, Some(Upvote), delta(1, 0)),
            (None, ClickDownvote, Some(Downvote), delta(0, 1)),
            (Some(Upvote), ClickUpvote, None, delta(-1, 0)),
            (Some(Upvote), ClickDownvote, Some(Downvote), delta(-1, 1)),
            (Some(Downvote), ClickDownvote, None, delta(0, -1)),
            (Some(Downvote), ClickUpvote, Some(Upvote), delta(1, -1)),
        ];
        for (from, action, to, d) in table {
            let t = action.apply_to(from);
            assert_eq!(t.from, from);
            assert_eq!(t.to, to, "{from:?} + {action:?}");
            assert_eq!(t.delta, d, "{from:?} + {action:?}");
        }
    }

    #[test]
    fn counters_floor_at_zero() {
        assert_eq!(delta(-1, 1).apply(0, 0), (0, 1));
        assert_eq!(delta(0, -1).apply(4, 0), (4, 0));
        assert_eq!(delta(1, -1).apply(5, 2), (6, 1));
    }

    #[test]
    fn double_click_restores_counters() {
        bolero::check!()
            .with_type::<(Option<VoteType>, VoteAction)>()
            .cloned()
            .for_each(|(start, action)| {
                let first = action.apply_to(start);
                let second = action.apply_to(first.to);
                if start.is_none() {
                    assert_eq!(second.to, None);
                    let (up, down) = first.delta.apply(3, 1);
                    assert_eq!(second.delta.apply(up, down), (3, 1));
                }
                // clicking the same button twice never leaves a vote of the other kind
                assert_ne!(second.to, Some(match action {
                    ClickUpvote => Downvote,
                    ClickDownvote => Upvote,
                }));
            });
    }

    #[test]
    fn vote_type_text_form() {
        assert_eq!("upvote".parse::<VoteType>().unwrap(), Upvote);
        assert_eq!(Downvote.as_str().parse::<VoteType>().unwrap(), Downvote);
        assert!("sideways".parse::<VoteType>().is_err());
    }
}
