// fpl-picker entry point.
//
// 1. Initialize tracing (log to file, keep stdout for results)
// 2. Parse the command line and load config
// 3. Run the requested command
// 4. Print the report, then stream the explanation if asked

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use fpl_core::error::OptimizeError;
use fpl_llm::LlmClient;
use fpl_picker::app;
use fpl_picker::cli::{Cli, Command};
use fpl_picker::config;
use fpl_picker::report;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("warning: logging disabled: {e:#}");
    }
    info!("fpl-picker starting up");

    // A timed-out solve is left running on the blocking pool; the runtime is
    // shut down without joining it.
    let outcome = match app::block_on_detached(run(cli)) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {e:#}");
            // No legal squad is an answer, not a crash.
            match e.downcast_ref::<OptimizeError>() {
                Some(opt) if opt.is_no_solution() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: budget {} tenths, club cap {}, formation {}, source {}",
        config.squad.budget_tenths,
        config.squad.club_cap,
        config.formation,
        config.data.source.as_str()
    );

    match cli.command {
        Command::Import(args) => {
            let summary = app::run_import(&config, &args)?;
            println!(
                "Imported {} teams, {} players, {} history rows ({} dropped for unknown players)",
                summary.teams, summary.players, summary.history_rows, summary.history_dropped
            );
        }
        Command::Optimize(args) => {
            let outcome = app::run_optimize(&config, &args).await?;
            let mut squad_report = report::build_report(
                &outcome.result,
                &outcome.details,
                outcome.source.as_str(),
                outcome.formation.as_str(),
            )
            .with_transfers(outcome.transfers.as_ref());
            squad_report.run_id = outcome.run_id;

            if args.json {
                println!("{}", report::render_json(&squad_report)?);
            } else {
                print!("{}", report::render_text(&squad_report));
            }

            if args.explain {
                let client = LlmClient::from_config(&config.llm_config());
                match &client {
                    LlmClient::Active(_) => info!("LLM client initialized (API key configured)"),
                    LlmClient::Disabled => info!("LLM client disabled (no API key)"),
                }
                let explained = app::explain(&client, &outcome, |token| {
                    // stdout carries only the report.
                    let mut err = std::io::stderr();
                    let _ = err.write_all(token.as_bytes());
                    let _ = err.flush();
                })
                .await;
                match explained {
                    Ok(Some(_)) => eprintln!(),
                    Ok(None) => eprintln!(
                        "explanation skipped: set anthropic_api_key in config/credentials.toml"
                    ),
                    Err(e) => {
                        error!("Explanation failed: {:#}", e);
                        eprintln!("\nexplanation failed: {e:#}");
                    }
                }
            }
        }
    }

    info!("fpl-picker finished");
    Ok(())
}

/// Initialize tracing to log to a file so stdout carries only results.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("fpl-picker.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("fpl_picker=info,fpl_core=info,fpl_data=info,warn")
        }))
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
