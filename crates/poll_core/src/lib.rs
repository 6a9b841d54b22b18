pub mod clock;
pub mod db;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod schema;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{LedgerError, Result};
pub use ledger::PollLedger;
pub use limits::PollLimits;
pub use schema::{Poll, PollEvent, PollOptions, VoteRecord, VoterChoice, Winner};
