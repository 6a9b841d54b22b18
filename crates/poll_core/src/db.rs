use crate::schema::{Poll, VoteRecord};
use anyhow::Result;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub fn open(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS polls (
          id INTEGER PRIMARY KEY,
          title TEXT NOT NULL,
          description TEXT NOT NULL,
          creator TEXT NOT NULL,
          options_json TEXT NOT NULL,
          vote_counts_json TEXT NOT NULL,
          start_time INTEGER NOT NULL,
          end_time INTEGER NOT NULL,
          is_active INTEGER NOT NULL,
          total_votes INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS votes (
          poll_id INTEGER NOT NULL,
          voter TEXT NOT NULL,
          option_index INTEGER NOT NULL,
          PRIMARY KEY (poll_id, voter)
        );

        CREATE INDEX IF NOT EXISTS idx_votes_poll_id ON votes(poll_id);
        "#,
    )?;
    Ok(())
}

pub fn insert_poll(conn: &Connection, poll: &Poll) -> Result<()> {
    let options_json = serde_json::to_string(&poll.options)?;
    let vote_counts_json = serde_json::to_string(&poll.vote_counts)?;

    conn.execute(
        r#"
        INSERT INTO polls (
          id, title, description, creator,
          options_json, vote_counts_json,
          start_time, end_time, is_active, total_votes
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            poll.id as i64,
            poll.title,
            poll.description,
            poll.creator,
            options_json,
            vote_counts_json,
            poll.start_time,
            poll.end_time,
            poll.is_active as i64,
            poll.total_votes as i64
        ],
    )?;

    Ok(())
}

/// Persist one accepted vote: the updated tallies and the new vote row go
/// in a single transaction, mirroring the ledger's atomic unit.
pub fn record_vote(
    conn: &mut Connection,
    poll: &Poll,
    voter: &str,
    record: &VoteRecord,
) -> Result<()> {
    let vote_counts_json = serde_json::to_string(&poll.vote_counts)?;

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE polls SET vote_counts_json = ?1, total_votes = ?2 WHERE id = ?3",
        params![vote_counts_json, poll.total_votes as i64, poll.id as i64],
    )?;
    tx.execute(
        "INSERT INTO votes (poll_id, voter, option_index) VALUES (?1, ?2, ?3)",
        params![poll.id as i64, voter, record.option_index as i64],
    )?;
    tx.commit()?;

    Ok(())
}

pub fn mark_ended(conn: &Connection, poll_id: u64) -> Result<()> {
    conn.execute(
        "UPDATE polls SET is_active = 0 WHERE id = ?1",
        params![poll_id as i64],
    )?;
    Ok(())
}

#[derive(Debug)]
struct PollRow {
    id: i64,
    title: String,
    description: String,
    creator: String,
    options_json: String,
    vote_counts_json: String,
    start_time: i64,
    end_time: i64,
    is_active: i64,
    total_votes: i64,
}

/// Load the persisted Poll and VoteRecord collections. Derived views are
/// recomputed by the ledger, never stored here.
pub fn load_state(conn: &Connection) -> Result<(Vec<Poll>, HashMap<u64, HashMap<String, VoteRecord>>)> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, title, description, creator, options_json, vote_counts_json,
               start_time, end_time, is_active, total_votes
        FROM polls
        ORDER BY id
        "#,
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(PollRow {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            creator: row.get(3)?,
            options_json: row.get(4)?,
            vote_counts_json: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            is_active: row.get(8)?,
            total_votes: row.get(9)?,
        })
    })?;

    let mut polls = Vec::new();
    for r in rows {
        let p = r?;
        polls.push(Poll {
            id: p.id as u64,
            title: p.title,
            description: p.description,
            creator: p.creator,
            options: serde_json::from_str(&p.options_json)?,
            vote_counts: serde_json::from_str(&p.vote_counts_json)?,
            start_time: p.start_time,
            end_time: p.end_time,
            is_active: p.is_active != 0,
            total_votes: p.total_votes as u64,
        });
    }

    let mut stmt = conn.prepare("SELECT poll_id, voter, option_index FROM votes")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut votes: HashMap<u64, HashMap<String, VoteRecord>> = HashMap::new();
    for r in rows {
        let (poll_id, voter, option_index) = r?;
        votes.entry(poll_id as u64).or_default().insert(
            voter,
            VoteRecord {
                has_voted: true,
                option_index: option_index as usize,
            },
        );
    }

    Ok((polls, votes))
}
