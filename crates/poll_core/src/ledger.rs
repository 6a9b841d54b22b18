use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, Result};
use crate::limits::PollLimits;
use crate::schema::{Poll, PollEvent, PollOptions, VoteRecord, VoterChoice, Winner};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

type Observer = Box<dyn Fn(&PollEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct LedgerState {
    polls: BTreeMap<u64, Poll>,
    votes: HashMap<u64, HashMap<String, VoteRecord>>,
}

/// The poll/vote ledger. Owns every poll record and every per-identity vote
/// record; all mutation goes through its methods. Callers pass their
/// identity explicitly; the ledger never derives it.
///
/// One `RwLock` guards the whole registry. `vote` runs its check-then-write
/// sequence under a single write-lock acquisition, so no interleaving lets
/// the same identity pass the "no prior vote" check twice for one poll.
pub struct PollLedger {
    limits: PollLimits,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
    observers: Mutex<Vec<Observer>>,
}

impl PollLedger {
    pub fn new(limits: PollLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: PollLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            state: RwLock::new(LedgerState::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Rebuild a ledger from previously persisted collections. Derived views
    /// (active polls, winners) are recomputed, never restored.
    pub fn restore(
        limits: PollLimits,
        polls: Vec<Poll>,
        votes: HashMap<u64, HashMap<String, VoteRecord>>,
    ) -> Self {
        let ledger = Self::new(limits);
        {
            let mut state = ledger.state.write().unwrap();
            state.polls = polls.into_iter().map(|poll| (poll.id, poll)).collect();
            state.votes = votes;
        }
        ledger
    }

    /// Register a notification observer. Observers run synchronously after
    /// the state change that produced the event, outside the state lock.
    pub fn subscribe(&self, observer: impl Fn(&PollEvent) + Send + Sync + 'static) {
        self.observers.lock().unwrap().push(Box::new(observer));
    }

    fn emit(&self, event: PollEvent) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer(&event);
        }
    }

    /// Create a poll and return its ID. IDs are dense and sequential from 1
    /// in creation order. No partial state is created on failure.
    pub fn create_poll(
        &self,
        creator: &str,
        title: &str,
        description: &str,
        options: &[String],
        duration_secs: i64,
    ) -> Result<u64> {
        self.validate_poll_input(title, description, options, duration_secs)?;

        let now = self.clock.now();
        let mut state = self.state.write().unwrap();
        let poll_id = state.polls.len() as u64 + 1;
        state.polls.insert(
            poll_id,
            Poll {
                id: poll_id,
                title: title.to_string(),
                description: description.to_string(),
                creator: creator.to_string(),
                options: options.to_vec(),
                vote_counts: vec![0; options.len()],
                start_time: now,
                end_time: now + duration_secs,
                is_active: true,
                total_votes: 0,
            },
        );
        drop(state);

        info!("poll {poll_id} created by {creator}");
        self.emit(PollEvent::PollCreated {
            poll_id,
            creator: creator.to_string(),
            title: title.to_string(),
        });
        Ok(poll_id)
    }

    fn validate_poll_input(
        &self,
        title: &str,
        description: &str,
        options: &[String],
        duration_secs: i64,
    ) -> Result<()> {
        let limits = &self.limits;
        if title.is_empty() {
            return Err(LedgerError::InvalidInput("title cannot be empty".into()));
        }
        if title.chars().count() > limits.max_title_len {
            return Err(LedgerError::InvalidInput(format!(
                "title longer than {} characters",
                limits.max_title_len
            )));
        }
        if description.chars().count() > limits.max_description_len {
            return Err(LedgerError::InvalidInput(format!(
                "description longer than {} characters",
                limits.max_description_len
            )));
        }
        if options.len() < limits.min_options {
            return Err(LedgerError::InvalidInput(format!(
                "at least {} options required",
                limits.min_options
            )));
        }
        if options.len() > limits.max_options {
            return Err(LedgerError::InvalidInput(format!(
                "at most {} options allowed",
                limits.max_options
            )));
        }
        for option in options {
            if option.is_empty() {
                return Err(LedgerError::InvalidInput("option cannot be empty".into()));
            }
            if option.chars().count() > limits.max_option_len {
                return Err(LedgerError::InvalidInput(format!(
                    "option longer than {} characters",
                    limits.max_option_len
                )));
            }
        }
        if duration_secs < limits.min_duration_secs {
            return Err(LedgerError::InvalidInput(format!(
                "duration must be at least {} seconds",
                limits.min_duration_secs
            )));
        }
        Ok(())
    }

    /// Cast one vote for `voter` on `poll_id`. The vote record and the tally
    /// increments are written as one atomic unit; either both happen or
    /// neither does. Preconditions are checked in order and the first
    /// failing one determines the error.
    pub fn vote(&self, poll_id: u64, option_index: usize, voter: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().unwrap();
        let LedgerState { polls, votes } = &mut *state;

        let poll = polls
            .get_mut(&poll_id)
            .ok_or(LedgerError::PollNotFound(poll_id))?;
        if !poll.is_active {
            return Err(LedgerError::PollInactive);
        }
        if now >= poll.end_time {
            return Err(LedgerError::PollExpired);
        }
        if option_index >= poll.options.len() {
            return Err(LedgerError::InvalidOption);
        }
        let records = votes.entry(poll_id).or_default();
        if records.contains_key(voter) {
            return Err(LedgerError::AlreadyVoted);
        }

        records.insert(
            voter.to_string(),
            VoteRecord {
                has_voted: true,
                option_index,
            },
        );
        poll.vote_counts[option_index] += 1;
        poll.total_votes += 1;
        debug_assert_eq!(poll.total_votes, poll.vote_counts.iter().sum::<u64>());
        drop(state);

        debug!("vote recorded on poll {poll_id}, option {option_index}");
        self.emit(PollEvent::Voted {
            poll_id,
            voter: voter.to_string(),
            option_index,
        });
        Ok(())
    }

    /// Close a poll early. Only the creator may end a poll, and ending an
    /// already-ended poll is rejected rather than being a no-op. The check
    /// is on the stored flag only, so a creator can still end a poll whose
    /// deadline has already passed.
    pub fn end_poll(&self, poll_id: u64, caller: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let poll = state
            .polls
            .get_mut(&poll_id)
            .ok_or(LedgerError::PollNotFound(poll_id))?;
        if poll.creator != caller {
            return Err(LedgerError::NotCreator);
        }
        if !poll.is_active {
            return Err(LedgerError::PollAlreadyEnded);
        }
        poll.is_active = false;
        drop(state);

        info!("poll {poll_id} ended by its creator");
        Ok(())
    }

    pub fn get_poll(&self, poll_id: u64) -> Result<Poll> {
        let state = self.state.read().unwrap();
        state
            .polls
            .get(&poll_id)
            .cloned()
            .ok_or(LedgerError::PollNotFound(poll_id))
    }

    pub fn get_poll_options(&self, poll_id: u64) -> Result<PollOptions> {
        let state = self.state.read().unwrap();
        let poll = state
            .polls
            .get(&poll_id)
            .ok_or(LedgerError::PollNotFound(poll_id))?;
        Ok(PollOptions {
            names: poll.options.clone(),
            vote_counts: poll.vote_counts.clone(),
        })
    }

    pub fn get_voter_choice(&self, poll_id: u64, voter: &str) -> Result<VoterChoice> {
        let state = self.state.read().unwrap();
        if !state.polls.contains_key(&poll_id) {
            return Err(LedgerError::PollNotFound(poll_id));
        }
        let record = state.votes.get(&poll_id).and_then(|records| records.get(voter));
        Ok(match record {
            Some(record) => VoterChoice {
                has_voted: true,
                option_index: Some(record.option_index),
            },
            None => VoterChoice {
                has_voted: false,
                option_index: None,
            },
        })
    }

    /// The option with the strictly highest tally; ties go to the lowest
    /// index. Valid on live polls as a "currently leading" read, not only
    /// on final results.
    pub fn get_winner(&self, poll_id: u64) -> Result<Winner> {
        let state = self.state.read().unwrap();
        let poll = state
            .polls
            .get(&poll_id)
            .ok_or(LedgerError::PollNotFound(poll_id))?;
        let mut winner_index = 0;
        for (index, count) in poll.vote_counts.iter().enumerate() {
            if *count > poll.vote_counts[winner_index] {
                winner_index = index;
            }
        }
        Ok(Winner {
            name: poll.options[winner_index].clone(),
            vote_count: poll.vote_counts[winner_index],
            option_index: winner_index,
        })
    }

    /// IDs of polls still open for voting, ascending. A derived view,
    /// recomputed against the clock on every call.
    pub fn active_polls(&self) -> Vec<u64> {
        let now = self.clock.now();
        let state = self.state.read().unwrap();
        state
            .polls
            .values()
            .filter(|poll| poll.is_open(now))
            .map(|poll| poll.id)
            .collect()
    }

    /// Number of polls ever created. IDs run 1..=poll_count.
    pub fn poll_count(&self) -> u64 {
        self.state.read().unwrap().polls.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use assert_matches::assert_matches;

    const START: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    fn test_ledger() -> (Arc<FixedClock>, PollLedger) {
        let clock = Arc::new(FixedClock::new(START));
        let ledger = PollLedger::with_clock(PollLimits::default(), clock.clone());
        (clock, ledger)
    }

    fn language_options() -> Vec<String> {
        ["JavaScript", "Python", "Rust", "Go"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    fn create_language_poll(ledger: &PollLedger) -> u64 {
        ledger
            .create_poll(
                "owner",
                "Best Programming Language",
                "Vote for your favorite programming language",
                &language_options(),
                HOUR,
            )
            .unwrap()
    }

    #[test]
    fn create_poll_stores_fields() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);
        assert_eq!(poll_id, 1);

        let poll = ledger.get_poll(1).unwrap();
        assert_eq!(poll.title, "Best Programming Language");
        assert_eq!(poll.creator, "owner");
        assert_eq!(poll.start_time, START);
        assert_eq!(poll.end_time, START + HOUR);
        assert!(poll.is_active);
        assert_eq!(poll.total_votes, 0);
        assert_eq!(poll.vote_counts, vec![0, 0, 0, 0]);
        assert_eq!(ledger.poll_count(), 1);
    }

    #[test]
    fn poll_ids_are_dense_and_sequential() {
        let (_clock, ledger) = test_ledger();
        for expected in 1..=3 {
            let poll_id = ledger
                .create_poll("owner", "Poll", "", &language_options(), HOUR)
                .unwrap();
            assert_eq!(poll_id, expected);
        }
    }

    #[test]
    fn create_poll_rejects_bad_input() {
        let (_clock, ledger) = test_ledger();
        let options = language_options();

        let err = ledger.create_poll("owner", "", "", &options, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let one = vec!["Only one".to_string()];
        let err = ledger.create_poll("owner", "Poll", "", &one, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let eleven: Vec<String> = (0..11).map(|index| format!("option {index}")).collect();
        let err = ledger.create_poll("owner", "Poll", "", &eleven, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let blank = vec!["A".to_string(), String::new()];
        let err = ledger.create_poll("owner", "Poll", "", &blank, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let err = ledger.create_poll("owner", "Poll", "", &options, 30);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        // one-minute floor is inclusive
        assert!(ledger.create_poll("owner", "Poll", "", &options, 60).is_ok());

        // no partial state was created by the rejected calls
        assert_eq!(ledger.poll_count(), 1);
    }

    #[test]
    fn create_poll_rejects_overlong_fields() {
        let (_clock, ledger) = test_ledger();
        let options = language_options();

        let long_title = "t".repeat(101);
        let err = ledger.create_poll("owner", &long_title, "", &options, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let long_description = "d".repeat(501);
        let err = ledger.create_poll("owner", "Poll", &long_description, &options, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));

        let long_option = vec!["A".to_string(), "o".repeat(51)];
        let err = ledger.create_poll("owner", "Poll", "", &long_option, HOUR);
        assert_matches!(err, Err(LedgerError::InvalidInput(_)));
    }

    #[test]
    fn tallies_winner_and_totals() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        ledger.vote(poll_id, 0, "voter-a").unwrap();
        ledger.vote(poll_id, 0, "voter-b").unwrap();
        ledger.vote(poll_id, 1, "voter-c").unwrap();

        let winner = ledger.get_winner(poll_id).unwrap();
        assert_eq!(winner.name, "JavaScript");
        assert_eq!(winner.vote_count, 2);
        assert_eq!(winner.option_index, 0);

        let options = ledger.get_poll_options(poll_id).unwrap();
        assert_eq!(options.vote_counts, vec![2, 1, 0, 0]);
        assert_eq!(ledger.get_poll(poll_id).unwrap().total_votes, 3);
    }

    #[test]
    fn total_votes_matches_sum_after_every_vote() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        for (index, voter) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            ledger.vote(poll_id, index % 4, voter).unwrap();
            let poll = ledger.get_poll(poll_id).unwrap();
            assert_eq!(poll.total_votes, poll.vote_counts.iter().sum::<u64>());
        }
    }

    #[test]
    fn second_vote_always_rejected() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        ledger.vote(poll_id, 0, "voter-a").unwrap();
        // a different option index does not help
        let err = ledger.vote(poll_id, 1, "voter-a");
        assert_matches!(err, Err(LedgerError::AlreadyVoted));

        // the failed attempt changed nothing
        let poll = ledger.get_poll(poll_id).unwrap();
        assert_eq!(poll.vote_counts, vec![1, 0, 0, 0]);
        assert_eq!(poll.total_votes, 1);
    }

    #[test]
    fn voter_choice_is_tracked() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        ledger.vote(poll_id, 2, "voter-a").unwrap();
        let choice = ledger.get_voter_choice(poll_id, "voter-a").unwrap();
        assert!(choice.has_voted);
        assert_eq!(choice.option_index, Some(2));

        // not voted is a normal outcome, not an error
        let choice = ledger.get_voter_choice(poll_id, "voter-b").unwrap();
        assert!(!choice.has_voted);
        assert_eq!(choice.option_index, None);

        let err = ledger.get_voter_choice(999, "voter-a");
        assert_matches!(err, Err(LedgerError::PollNotFound(999)));
    }

    #[test]
    fn vote_on_unknown_poll_fails() {
        let (_clock, ledger) = test_ledger();
        let err = ledger.vote(999, 0, "voter-a");
        assert_matches!(err, Err(LedgerError::PollNotFound(999)));
    }

    #[test]
    fn vote_with_out_of_range_index_fails() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);
        let err = ledger.vote(poll_id, 10, "voter-a");
        assert_matches!(err, Err(LedgerError::InvalidOption));
    }

    #[test]
    fn end_poll_lifecycle() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        let err = ledger.end_poll(poll_id, "voter-a");
        assert_matches!(err, Err(LedgerError::NotCreator));

        ledger.end_poll(poll_id, "owner").unwrap();
        assert!(!ledger.get_poll(poll_id).unwrap().is_active);

        let err = ledger.vote(poll_id, 0, "voter-a");
        assert_matches!(err, Err(LedgerError::PollInactive));

        let err = ledger.end_poll(poll_id, "owner");
        assert_matches!(err, Err(LedgerError::PollAlreadyEnded));

        let err = ledger.end_poll(999, "owner");
        assert_matches!(err, Err(LedgerError::PollNotFound(999)));
    }

    #[test]
    fn clock_expiry_rejects_votes_and_hides_poll() {
        let (clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        clock.advance(HOUR + 1);
        let err = ledger.vote(poll_id, 0, "voter-a");
        assert_matches!(err, Err(LedgerError::PollExpired));
        assert!(ledger.active_polls().is_empty());

        // the stored flag has not flipped, only the clock has moved
        assert!(ledger.get_poll(poll_id).unwrap().is_active);

        // the creator may still finalize the stored state
        ledger.end_poll(poll_id, "owner").unwrap();
        let err = ledger.vote(poll_id, 0, "voter-a");
        assert_matches!(err, Err(LedgerError::PollInactive));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        clock.set(START + HOUR - 1);
        assert!(ledger.vote(poll_id, 0, "voter-a").is_ok());

        // active only while now < end_time
        clock.set(START + HOUR);
        let err = ledger.vote(poll_id, 0, "voter-b");
        assert_matches!(err, Err(LedgerError::PollExpired));
    }

    #[test]
    fn active_polls_in_ascending_id_order() {
        let (_clock, ledger) = test_ledger();
        for _ in 0..3 {
            create_language_poll(&ledger);
        }
        ledger.end_poll(2, "owner").unwrap();
        assert_eq!(ledger.active_polls(), vec![1, 3]);
    }

    #[test]
    fn winner_tie_breaks_to_lowest_index() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);

        ledger.vote(poll_id, 2, "voter-a").unwrap();
        ledger.vote(poll_id, 1, "voter-b").unwrap();

        let winner = ledger.get_winner(poll_id).unwrap();
        assert_eq!(winner.option_index, 1);
        assert_eq!(winner.name, "Python");
        assert_eq!(winner.vote_count, 1);
    }

    #[test]
    fn winner_of_untouched_poll_is_first_option() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);
        let winner = ledger.get_winner(poll_id).unwrap();
        assert_eq!(winner.option_index, 0);
        assert_eq!(winner.vote_count, 0);

        let err = ledger.get_winner(999);
        assert_matches!(err, Err(LedgerError::PollNotFound(999)));
    }

    #[test]
    fn winner_readable_on_live_and_ended_polls() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);
        ledger.vote(poll_id, 3, "voter-a").unwrap();

        let leading = ledger.get_winner(poll_id).unwrap();
        assert_eq!(leading.name, "Go");

        ledger.end_poll(poll_id, "owner").unwrap();
        let final_winner = ledger.get_winner(poll_id).unwrap();
        assert_eq!(final_winner, leading);
    }

    #[test]
    fn events_emitted_with_state_changes() {
        let (_clock, ledger) = test_ledger();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ledger.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let poll_id = create_language_poll(&ledger);
        ledger.vote(poll_id, 1, "voter-a").unwrap();
        // rejected operations emit nothing
        let _ = ledger.vote(poll_id, 0, "voter-a");

        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                PollEvent::PollCreated {
                    poll_id,
                    creator: "owner".to_string(),
                    title: "Best Programming Language".to_string(),
                },
                PollEvent::Voted {
                    poll_id,
                    voter: "voter-a".to_string(),
                    option_index: 1,
                },
            ]
        );
    }

    #[test]
    fn restore_rebuilds_state_and_keeps_ids_dense() {
        let (_clock, ledger) = test_ledger();
        let poll_id = create_language_poll(&ledger);
        ledger.vote(poll_id, 0, "voter-a").unwrap();

        let poll = ledger.get_poll(poll_id).unwrap();
        let mut votes = HashMap::new();
        votes.insert(
            poll_id,
            HashMap::from([(
                "voter-a".to_string(),
                VoteRecord {
                    has_voted: true,
                    option_index: 0,
                },
            )]),
        );

        let restored = PollLedger::restore(PollLimits::default(), vec![poll.clone()], votes);
        assert_eq!(restored.get_poll(poll_id).unwrap(), poll);
        assert!(restored.get_voter_choice(poll_id, "voter-a").unwrap().has_voted);

        // the next allocation continues the dense sequence
        let next = restored
            .create_poll("owner", "Second", "", &language_options(), HOUR)
            .unwrap();
        assert_eq!(next, 2);
    }
}
