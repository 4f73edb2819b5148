//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Entity store admin CLI
#[derive(Parser, Debug)]
#[command(name = "estore", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.estore/data/estore.db)
    #[arg(long, global = true, env = "ESTORE_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "ESTORE_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migrations
    Migrate,

    /// Show applied migrations and row counts
    Status,

    /// Insert or replace an entity
    Put(PutArgs),

    /// Show one entity
    Get {
        /// Entity type (task, note, signal, job, job_run, checkpoint, view)
        entity_type: String,

        /// Entity ID
        id: String,
    },

    /// List every entity of a type
    List {
        /// Entity type
        entity_type: String,
    },

    /// Delete an entity
    Delete {
        /// Entity type
        entity_type: String,

        /// Entity ID
        id: String,
    },

    /// Show the audit trail
    Audit {
        /// Only transitions of this entity type
        #[arg(long = "type")]
        entity_type: Option<String>,

        /// Only transitions of this entity ID
        #[arg(long)]
        id: Option<String>,
    },

    /// Show run history for a job
    Jobs {
        /// Job ID
        job_id: String,

        /// Only runs before this RFC 3339 timestamp
        #[arg(long)]
        before: Option<String>,

        /// Maximum runs to show
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(clap::Args, Debug)]
pub struct PutArgs {
    /// Entity type
    pub entity_type: String,

    /// Entity ID
    pub id: String,

    /// Entity fields as a JSON object (camelCase keys)
    pub value: String,

    /// Record an audit transition to this state
    #[arg(long)]
    pub to_state: Option<String>,

    /// Previous state for the audit transition
    #[arg(long, requires = "to_state")]
    pub from_state: Option<String>,

    /// Reason for the audit transition
    #[arg(long, requires = "to_state")]
    pub reason: Option<String>,

    /// Kind of actor performing the change (user, system, ai)
    #[arg(long, default_value = "user")]
    pub actor_kind: String,
}
