use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use poll_core::clock::Clock;
use poll_core::db;
use poll_core::schema::{Poll, VoteRecord};
use poll_core::{PollLedger, PollLimits, SystemClock};
use rusqlite::Connection;
use schemars::schema_for;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Parser)]
#[command(name = "votechain")]
#[command(about = "VoteChain Poll Ledger CLI", long_about = None)]
struct Cli {
    /// Path to the ledger database
    #[arg(long, global = true, default_value = "votechain.db")]
    db: String,

    /// TOML file overriding the default poll limits
    #[arg(long, global = true)]
    limits: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger database
    Init,
    /// Create a new poll
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Option name; repeat for each option
        #[arg(long = "option", required = true)]
        options: Vec<String>,
        /// Poll duration in seconds
        #[arg(long, default_value_t = 3600)]
        duration: i64,
        /// Caller identity (pre-authenticated by the host environment)
        #[arg(long = "as", value_name = "IDENTITY")]
        caller: String,
    },
    /// Cast a vote on a poll
    Vote {
        poll_id: u64,
        option_index: usize,
        #[arg(long = "as", value_name = "IDENTITY")]
        caller: String,
    },
    /// End a poll early (creator only)
    End {
        poll_id: u64,
        #[arg(long = "as", value_name = "IDENTITY")]
        caller: String,
    },
    /// List polls
    List {
        /// Only polls still open for voting
        #[arg(long)]
        active: bool,
    },
    /// Show one poll with its tally
    Show { poll_id: u64 },
    /// Show the winning (or currently leading) option
    Winner { poll_id: u64 },
    /// Show whether an identity has voted, and for what
    Choice { poll_id: u64, identity: String },
    /// Export canonical JSON Schemas
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let limits = match &cli.limits {
        Some(path) => PollLimits::load_from_path(path)?,
        None => PollLimits::default(),
    };

    match cli.command {
        Commands::Init => {
            db::open(&cli.db)?;
            println!("Initialized ledger database at {}", cli.db);
            Ok(())
        }
        Commands::Create {
            title,
            description,
            options,
            duration,
            caller,
        } => {
            let (conn, ledger) = open_ledger(&cli.db, limits)?;
            let poll_id = ledger.create_poll(&caller, &title, &description, &options, duration)?;
            db::insert_poll(&conn, &ledger.get_poll(poll_id)?)?;
            println!("Created poll {poll_id}");
            Ok(())
        }
        Commands::Vote {
            poll_id,
            option_index,
            caller,
        } => {
            let (mut conn, ledger) = open_ledger(&cli.db, limits)?;
            ledger.vote(poll_id, option_index, &caller)?;
            let record = VoteRecord {
                has_voted: true,
                option_index,
            };
            db::record_vote(&mut conn, &ledger.get_poll(poll_id)?, &caller, &record)?;
            println!("Recorded vote on poll {poll_id} for option {option_index}");
            Ok(())
        }
        Commands::End { poll_id, caller } => {
            let (conn, ledger) = open_ledger(&cli.db, limits)?;
            ledger.end_poll(poll_id, &caller)?;
            db::mark_ended(&conn, poll_id)?;
            println!("Ended poll {poll_id}");
            Ok(())
        }
        Commands::List { active } => {
            let (_conn, ledger) = open_ledger(&cli.db, limits)?;
            let ids: Vec<u64> = if active {
                ledger.active_polls()
            } else {
                (1..=ledger.poll_count()).collect()
            };
            let now = SystemClock.now();
            let mut summaries = Vec::new();
            for id in ids {
                let poll = ledger.get_poll(id)?;
                summaries.push(PollSummary {
                    id: poll.id,
                    title: poll.title.clone(),
                    status: poll_status(&poll, now).to_string(),
                    total_votes: poll.total_votes,
                    ends_at: format_ts(poll.end_time),
                });
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            Ok(())
        }
        Commands::Show { poll_id } => {
            let (_conn, ledger) = open_ledger(&cli.db, limits)?;
            let poll = ledger.get_poll(poll_id)?;
            println!("{}", serde_json::to_string_pretty(&poll)?);
            Ok(())
        }
        Commands::Winner { poll_id } => {
            let (_conn, ledger) = open_ledger(&cli.db, limits)?;
            let winner = ledger.get_winner(poll_id)?;
            println!("{}", serde_json::to_string_pretty(&winner)?);
            Ok(())
        }
        Commands::Choice { poll_id, identity } => {
            let (_conn, ledger) = open_ledger(&cli.db, limits)?;
            let choice = ledger.get_voter_choice(poll_id, &identity)?;
            println!("{}", serde_json::to_string_pretty(&choice)?);
            Ok(())
        }
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

#[derive(Serialize)]
struct PollSummary {
    id: u64,
    title: String,
    status: String,
    total_votes: u64,
    ends_at: String,
}

fn open_ledger(db_path: &str, limits: PollLimits) -> Result<(Connection, PollLedger)> {
    let conn = db::open(db_path)?;
    let (polls, votes) = db::load_state(&conn)?;
    let ledger = PollLedger::restore(limits, polls, votes);
    ledger.subscribe(|event| info!("{event:?}"));
    Ok((conn, ledger))
}

fn poll_status(poll: &Poll, now: i64) -> &'static str {
    if !poll.is_active {
        "ended"
    } else if now >= poll.end_time {
        "expired"
    } else {
        "active"
    }
}

fn format_ts(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    // Export Poll schema
    let poll_schema = schema_for!(poll_core::schema::Poll);
    let poll_json = serde_json::to_string_pretty(&poll_schema)?;
    fs::write(out_dir.join("Poll.schema.json"), poll_json)?;

    // Export VoteRecord schema
    let record_schema = schema_for!(poll_core::schema::VoteRecord);
    let record_json = serde_json::to_string_pretty(&record_schema)?;
    fs::write(out_dir.join("VoteRecord.schema.json"), record_json)?;

    // Export Winner schema
    let winner_schema = schema_for!(poll_core::schema::Winner);
    let winner_json = serde_json::to_string_pretty(&winner_schema)?;
    fs::write(out_dir.join("Winner.schema.json"), winner_json)?;

    // Export PollEvent schema
    let event_schema = schema_for!(poll_core::schema::PollEvent);
    let event_json = serde_json::to_string_pretty(&event_schema)?;
    fs::write(out_dir.join("PollEvent.schema.json"), event_json)?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
