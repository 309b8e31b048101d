use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::range::ViewType;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "carebook",
    version,
    about = "Carebook: availability expansion and calendar ranges for booking",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rcfile")]
    pub rcfile: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// IANA timezone used to display and interpret local times.
    #[arg(long = "timezone", visible_alias = "tz")]
    pub timezone: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the UTC query window for a calendar view.
    Range {
        #[arg(value_parser = parse_view)]
        view: ViewType,
        anchor: Option<String>,
    },

    /// List expanded occurrences in a calendar view.
    Agenda {
        #[arg(value_parser = parse_view)]
        view: ViewType,
        anchor: Option<String>,
    },

    /// List bookable service slots in a calendar view.
    Slots {
        #[arg(value_parser = parse_view)]
        view: ViewType,
        anchor: Option<String>,
        #[arg(long = "service")]
        service: Option<String>,
    },

    /// List stored availability rules.
    Rules,

    /// Store a new availability rule.
    AddRule(AddRuleArgs),

    /// Record a booking against a rule.
    AddBooking(AddBookingArgs),

    /// Block out an interval so overlapping slots are not offered.
    Block {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct AddRuleArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// Comma separated weekday numbers, 0 = Sunday. Makes the rule recurring.
    #[arg(long, value_delimiter = ',')]
    pub days: Vec<u8>,

    #[arg(long)]
    pub until: Option<String>,

    #[arg(long = "rule", default_value = "continuous")]
    pub scheduling_rule: String,

    /// `SERVICE:MINUTES[:CENTS]`, repeatable.
    #[arg(long = "service", action = ArgAction::Append)]
    pub services: Vec<String>,

    #[arg(long, conflicts_with_all = ["organization", "location"])]
    pub provider: Option<String>,

    #[arg(long, requires = "location")]
    pub organization: Option<String>,

    #[arg(long, requires = "organization")]
    pub location: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AddBookingArgs {
    #[arg(long)]
    pub rule: String,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    #[arg(long)]
    pub client: String,

    #[arg(long, default_value = "booked")]
    pub status: String,

    #[arg(long)]
    pub slot: Option<String>,

    #[arg(long = "price", default_value_t = 0)]
    pub price_cents: u32,
}

fn parse_view(raw: &str) -> anyhow::Result<ViewType> {
    raw.parse()
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls bare `rc.KEY=VALUE` / `rc.KEY:VALUE` tokens out of the argument
/// list before clap sees them.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
