//! Segment CLI: compile stored segment queries to SQL and preview them
//! against a subscriber export.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use crm_core::config::{AppConfig, PlaceholderStyle};
use crm_core::types::load_subscribers;
use crm_segmentation::{
    FieldResolver, InMemorySubscriberStore, Mode, SegmentCompiler, SegmentQuery,
    SubscriberStore,
};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "crm-segment")]
#[command(about = "Compile and preview subscriber segments")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables prefixed CRM__ still apply)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Reject unknown operators and malformed values instead of matching everyone
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a segment query document and print the SQL and parameters
    Compile {
        /// Path to the segment query JSON
        #[arg(short, long)]
        query: PathBuf,

        /// Count matches or select full rows
        #[arg(long, value_enum, default_value = "count")]
        mode: ModeArg,

        /// Use $1, $2, ... placeholders instead of ?
        #[arg(long, default_value_t = false)]
        numbered: bool,

        /// Clock for time-relative operators, RFC 3339 (default: now)
        #[arg(long)]
        now: Option<String>,
    },

    /// Count (and optionally list) the subscribers a query matches
    Preview {
        /// Path to the segment query JSON
        #[arg(short, long)]
        query: PathBuf,

        /// Path to a JSON array of subscriber rows
        #[arg(short, long)]
        subscribers: PathBuf,

        /// Also print the matching email addresses
        #[arg(long, default_value_t = false)]
        list: bool,
    },

    /// List the fields a segment condition may reference
    Fields,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Count,
    Rows,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Count => Mode::Count,
            ModeArg::Rows => Mode::Rows,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load_from(cli.config.as_deref());
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    init_tracing(&config);
    if let Err(e) = &loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    // CLI overrides
    if cli.strict {
        config.segmentation.strict_operators = true;
        config.segmentation.strict_values = true;
    }

    let compiler = SegmentCompiler::from_config(&config.segmentation);

    match cli.command {
        Commands::Compile {
            query,
            mode,
            numbered,
            now,
        } => {
            let query = read_query(&query)?;
            let now = parse_now(now.as_deref())?;
            let style = if numbered {
                PlaceholderStyle::Numbered
            } else {
                config.segmentation.placeholder
            };

            let filter = compiler.compile(&query, mode.into(), now)?;
            info!(
                parameters = filter.parameters().len(),
                time_relative = filter.is_time_relative(),
                "Segment compiled"
            );

            let output = json!({
                "sql": filter.to_sql(&config.segmentation.table, style),
                "where": filter.where_clause(style),
                "parameters": filter.parameters(),
                "mode": filter.mode(),
                "time_relative": filter.is_time_relative(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Preview {
            query,
            subscribers,
            list,
        } => {
            let query = read_query(&query)?;
            let rows = load_subscribers(&subscribers)
                .with_context(|| format!("loading {}", subscribers.display()))?;
            let store = InMemorySubscriberStore::with_subscribers(rows);
            let now = Utc::now();

            if list {
                let filter = compiler.compile(&query, Mode::Rows, now)?;
                let matches = store.fetch(&filter)?;
                let emails: Vec<&str> = matches.iter().map(|s| s.email.as_str()).collect();
                let output = json!({ "count": matches.len(), "emails": emails });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let filter = compiler.compile(&query, Mode::Count, now)?;
                let count = store.count(&filter)?;
                println!("{}", serde_json::to_string_pretty(&json!({ "count": count }))?);
            }
            info!(total = store.len(), "Preview complete");
        }

        Commands::Fields => {
            println!("{:<20} COLUMN", "FIELD");
            for (name, field) in FieldResolver::new().known_fields() {
                println!("{:<20} {}", name, field.column());
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_query(path: &Path) -> anyhow::Result<SegmentQuery> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    SegmentQuery::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn parse_now(now: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match now {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now timestamp: {s}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}
