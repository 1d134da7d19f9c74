mod db;
mod error;
mod models;
mod scheduler;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use db::Database;
use models::{AnswerEntry, Difficulty, JsonOutput, NewAttempt, NewItem, ReviewableItem};

const DEFAULT_DB_NAME: &str = "remberify.db";
const DEFAULT_OWNER: &str = "local";

#[derive(Parser)]
#[command(name = "remberify")]
#[command(about = "Spaced-repetition review scheduling for Remberify quizzes")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Learner identifier supplied by the identity provider
    #[arg(long, global = true, env = "REMBERIFY_OWNER", default_value = DEFAULT_OWNER)]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage quizzes
    #[command(subcommand)]
    Item(ItemCommands),

    /// Record a finished quiz session and advance its schedule
    Attempt {
        /// Item ID
        id: i64,

        /// Number of correct answers
        #[arg(long, short)]
        score: u32,

        /// Number of questions presented
        #[arg(long, short)]
        total: u32,

        /// Answers as a JSON array of {question_index, submitted, correct}
        #[arg(long, short)]
        answers: Option<String>,

        /// Seconds the session took
        #[arg(long = "time")]
        time_taken: Option<f64>,
    },

    /// List quizzes due for review now
    Due,

    /// Pick the next quiz to review (stochastic selection)
    Next,

    /// Show the attempt history of a quiz
    History {
        /// Item ID
        id: i64,
    },

    /// Show review statistics
    Stats,
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add a new quiz
    Add {
        /// Quiz title
        title: String,

        /// Summary of the source content
        #[arg(long, short)]
        summary: Option<String>,

        /// Generation difficulty: easy/medium/hard
        #[arg(long, short, default_value = "medium")]
        difficulty: String,

        /// Retrieval URL of the uploaded source file
        #[arg(long, short)]
        url: Option<String>,
    },

    /// List all quizzes
    List,

    /// Show quiz details
    Show {
        /// Item ID
        id: i64,
    },

    /// Delete a quiz and its attempts
    Delete {
        /// Item ID
        id: i64,
    },
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("REMBERIFY_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remberify");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

// Logs go to stderr so `--json` output on stdout stays parseable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path();
    let db = Database::open(&db_path)?;
    db.init()?;
    let owner = cli.owner.as_str();

    match cli.command {
        Commands::Init => {
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Item(item_cmd) => match item_cmd {
            ItemCommands::Add {
                title,
                summary,
                difficulty,
                url,
            } => {
                let difficulty = Difficulty::from_str(&difficulty).ok_or_else(|| {
                    format!(
                        "Invalid difficulty '{}'. Use: easy, medium, or hard",
                        difficulty
                    )
                })?;
                let new_item = NewItem {
                    summary,
                    difficulty,
                    source_url: url,
                    ..NewItem::titled(title)
                };

                let id = db.add_item(owner, &new_item)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "title": new_item.title
                        })))?
                    );
                } else {
                    println!("Added quiz '{}' with ID: {}", new_item.title, id);
                }
            }

            ItemCommands::List => {
                let items = db.list_items(owner)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&items))?);
                } else if items.is_empty() {
                    println!("No quizzes found.");
                } else {
                    print_item_table(&items);
                }
            }

            ItemCommands::Show { id } => match db.get_item(id)? {
                Some(item) if item.owner_id == owner => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&item))?);
                    } else {
                        println!("Quiz: {}", item.title);
                        println!("ID: {}", item.id);
                        if let Some(summary) = &item.summary {
                            println!("Summary: {}", summary);
                        }
                        println!("Difficulty: {}", item.difficulty.as_str());
                        if let Some(url) = &item.source_url {
                            println!("Source: {}", url);
                        }
                        println!("Created: {}", format_timestamp(item.created_at));
                        println!();
                        println!("--- Schedule ---");
                        println!("Reviews: {}", item.review_count);
                        if let Some(performance) = item.last_performance {
                            println!("Last score: {:.0}%", performance * 100.0);
                        }
                        if let Some(last) = item.last_reviewed_at {
                            println!("Last reviewed: {}", format_timestamp(last));
                        }
                        println!("Next review: {}", format_timestamp(item.next_review_at));
                        if item.is_due(Utc::now()) {
                            println!("Status: due for review");
                        }
                    }
                }
                _ => print_not_found(cli.json)?,
            },

            ItemCommands::Delete { id } => {
                if owns(&db, id, owner)? && db.delete_item(id)? {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Quiz {} deleted.", id);
                    }
                } else {
                    print_not_found(cli.json)?;
                }
            }
        },

        Commands::Attempt {
            id,
            score,
            total,
            answers,
            time_taken,
        } => {
            if !owns(&db, id, owner)? {
                return print_not_found(cli.json);
            }
            let answers: Vec<AnswerEntry> = match answers {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Vec::new(),
            };
            let attempt = NewAttempt {
                item_id: id,
                owner_id: owner.to_string(),
                score,
                total_questions: total,
                answers,
                time_taken_seconds: time_taken,
            };

            let attempt_id = db.record_attempt(&attempt)?;
            let outcome = db.advance_schedule(id, score, total)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "attempt_id": attempt_id,
                        "schedule": outcome
                    })))?
                );
            } else {
                println!("Attempt {} recorded for quiz {}.", attempt_id, id);
                println!(
                    "Score: {}/{} ({} band)",
                    score,
                    total,
                    outcome.band.as_str()
                );
                println!("Reviews so far: {}", outcome.new_review_count);
                println!(
                    "Next review scheduled: {}",
                    format_timestamp(outcome.next_review_at)
                );
            }
        }

        Commands::Due => {
            let due = db.list_due(owner, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&due))?);
            } else if due.is_empty() {
                println!("Nothing due for review.");
            } else {
                print_item_table(&due);
            }
        }

        Commands::Next => {
            if let Some(item) = db.next_due(owner, Utc::now())? {
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&item))?);
                } else {
                    println!("=== Next Quiz to Review ===");
                    println!();
                    println!("Quiz: {} (ID: {})", item.title, item.id);
                    if let Some(summary) = &item.summary {
                        println!("Summary: {}", summary);
                    }
                    println!("Reviews: {}", item.review_count);
                    println!("Due since: {}", format_timestamp(item.next_review_at));
                    println!();
                    println!("After the quiz, record the result with:");
                    println!("  remberify attempt {} --score <N> --total <M>", item.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Nothing due for review.");
            }
        }

        Commands::History { id } => {
            if !owns(&db, id, owner)? {
                return print_not_found(cli.json);
            }
            let attempts = db.list_attempts(id)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&attempts))?);
            } else if attempts.is_empty() {
                println!("No attempts recorded for quiz {}.", id);
            } else {
                println!("{:<6} {:<22} {:<8} {:<7} TIME", "ID", "COMPLETED", "SCORE", "PCT");
                println!("{}", "-".repeat(55));
                for attempt in attempts {
                    let time = attempt
                        .time_taken_seconds
                        .map(|s| format!("{:.0}s", s))
                        .unwrap_or_else(|| String::from("-"));
                    println!(
                        "{:<6} {:<22} {:<8} {:<7} {}",
                        attempt.id,
                        format_timestamp(attempt.completed_at),
                        format!("{}/{}", attempt.score, attempt.total_questions),
                        format!("{:.0}%", attempt.performance() * 100.0),
                        time
                    );
                }
            }
        }

        Commands::Stats => {
            let stats = db.stats(owner, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Review Statistics ===");
                println!("Total quizzes: {}", stats.total_items);
                println!("Total attempts: {}", stats.total_attempts);
                println!("Due for review: {}", stats.due_now);
                println!("Average score: {:.0}%", stats.avg_performance * 100.0);
                println!("Most reviews on one quiz: {}", stats.max_review_count);
            }
        }
    }

    Ok(())
}

fn print_item_table(items: &[ReviewableItem]) {
    println!("{:<5} {:<40} {:<8} NEXT REVIEW", "ID", "TITLE", "REVIEWS");
    println!("{}", "-".repeat(80));
    for item in items {
        println!(
            "{:<5} {:<40} {:<8} {}",
            item.id,
            truncate(&item.title, 38),
            item.review_count,
            format_timestamp(item.next_review_at)
        );
    }
}

fn owns(db: &Database, id: i64, owner: &str) -> Result<bool, Box<dyn std::error::Error>> {
    Ok(db.get_item(id)?.is_some_and(|item| item.owner_id == owner))
}

fn print_not_found(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!(
            "{}",
            serde_json::to_string(&JsonOutput::<()>::err("Quiz not found"))?
        );
    } else {
        println!("Quiz not found.");
    }
    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

// Counts characters, not bytes, so multi-byte titles never split mid-codepoint
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
