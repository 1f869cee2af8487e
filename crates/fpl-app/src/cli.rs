// Command-line interface for the fpl-picker binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fpl_core::lineup::FormationRule;
use fpl_core::player::PlayerId;
use fpl_data::ScoreSource;

#[derive(Debug, Parser)]
#[command(name = "fpl-picker")]
#[command(about = "Pick a Fantasy Premier League squad, lineup and captain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Select a squad, starting eleven and captain
    Optimize(OptimizeArgs),

    /// Load players, teams and gameweek history into the database
    Import(ImportArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct OptimizeArgs {
    /// Force a player into the squad by full name (repeatable)
    #[arg(long = "lock", value_name = "NAME")]
    pub locks: Vec<String>,

    /// Current 15-player squad as comma-separated ids
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub prior_squad: Vec<PlayerId>,

    /// Use the most recently saved squad as the current squad
    #[arg(long, conflicts_with = "prior_squad")]
    pub prior_from_last_run: bool,

    /// Exact number of transfers to make from the current squad
    #[arg(long, value_name = "N")]
    pub transfers: Option<usize>,

    /// Score source (overrides config)
    #[arg(long, value_parser = parse_source)]
    pub source: Option<ScoreSource>,

    /// Formation rule: one-forward or two-forwards (overrides config)
    #[arg(long, value_parser = parse_formation)]
    pub formation: Option<FormationRule>,

    /// Budget in tenths (overrides config)
    #[arg(long, value_name = "TENTHS")]
    pub budget: Option<u32>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Persist the result in the database
    #[arg(long)]
    pub save: bool,

    /// Stream a natural-language explanation of the selection
    #[arg(long)]
    pub explain: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// Players export (id, names, team, position, now_cost)
    #[arg(long)]
    pub players: PathBuf,

    /// Teams export (id, name, short_name)
    #[arg(long)]
    pub teams: Option<PathBuf>,

    /// Per-gameweek history export
    #[arg(long)]
    pub history: Option<PathBuf>,
}

fn parse_source(s: &str) -> Result<ScoreSource, String> {
    match s.trim().to_lowercase().as_str() {
        "predictions" => Ok(ScoreSource::Predictions),
        "history" => Ok(ScoreSource::History),
        "database" | "db" => Ok(ScoreSource::Database),
        other => Err(format!(
            "unknown source '{other}' (expected predictions, history or database)"
        )),
    }
}

fn parse_formation(s: &str) -> Result<FormationRule, String> {
    FormationRule::parse(s)
        .ok_or_else(|| format!("unknown formation '{s}' (expected one-forward or two-forwards)"))
}
