use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One vote event with a fixed option set and a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Poll {
    pub id: u64,               // dense, sequential from 1, creation order
    pub title: String,
    pub description: String,
    pub creator: String,       // opaque identity, pre-authenticated upstream
    pub options: Vec<String>,  // fixed at creation
    pub vote_counts: Vec<u64>, // index-aligned with options
    pub start_time: i64,       // unix seconds
    pub end_time: i64,         // start_time + duration
    pub is_active: bool,       // explicit flag, distinct from clock expiry
    pub total_votes: u64,
}

impl Poll {
    /// Open for voting: the stored flag is true and the deadline has not
    /// passed. Both conditions are required; the flag alone is not enough.
    pub fn is_open(&self, now: i64) -> bool {
        self.is_active && now < self.end_time
    }
}

/// Per-identity record of a vote on one poll. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VoteRecord {
    pub has_voted: bool,
    pub option_index: usize,
}

/// Result of a voter-choice query. A missing vote is a normal outcome,
/// so the index is absent rather than the query failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VoterChoice {
    pub has_voted: bool,
    pub option_index: Option<usize>,
}

/// Option names and their tallies, in option order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PollOptions {
    pub names: Vec<String>,
    pub vote_counts: Vec<u64>,
}

/// The option with the highest tally, ties broken by lowest index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Winner {
    pub name: String,
    pub vote_count: u64,
    pub option_index: usize,
}

/// Notifications emitted synchronously with the state change that produced
/// them. Fire and forget; no delivery guarantees beyond that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum PollEvent {
    PollCreated {
        poll_id: u64,
        creator: String,
        title: String,
    },
    Voted {
        poll_id: u64,
        voter: String,
        option_index: usize,
    },
}
