//! Entity store CLI entry point.

use clap::Parser;
use estore::cli::commands;
use estore::cli::{Cli, Commands};
use estore::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    init_tracing(cli.verbose, cli.quiet);

    // --json, or stdout is not a terminal
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();

    match &cli.command {
        Commands::Migrate => commands::migrate::execute(db, json),
        Commands::Status => commands::status::execute(db, json),

        // Entities
        Commands::Put(args) => commands::entity::put(args, db, cli.actor.as_deref(), json),
        Commands::Get { entity_type, id } => commands::entity::get(entity_type, id, db, json),
        Commands::List { entity_type } => commands::entity::list(entity_type, db, json),
        Commands::Delete { entity_type, id } => {
            commands::entity::delete(entity_type, id, db, json)
        }

        // History
        Commands::Audit { entity_type, id } => {
            commands::audit::execute(entity_type.as_deref(), id.as_deref(), db, json)
        }
        Commands::Jobs {
            job_id,
            before,
            limit,
        } => commands::jobs::execute(job_id, before.as_deref(), *limit, db, json),

        Commands::Version => commands::version::execute(json),
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
