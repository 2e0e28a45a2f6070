use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Limit, Settings};

/// migtree: schema migrations in a year/month directory tree.
///
/// Create, apply, revert and list migrations stored under `root/YYYY/MM`.
#[derive(Parser)]
#[command(name = "migtree", version, about, long_about = None)]
struct Cli {
    /// Path to the config file.
    #[arg(short, long, global = true, default_value = migtree::CONFIG_FILE)]
    config: PathBuf,

    /// Migration root directory (overrides the config file).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// SQLite database holding the history table (overrides the config file).
    #[arg(long, global = true, env = "MIGTREE_DATABASE")]
    database: Option<PathBuf>,

    /// Log more (-v for info, -vv for debug). `MIGTREE_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new migration file under the current year/month directory.
    Create {
        /// Migration name, e.g. `add_users_table` or `app\migrations\createPost`.
        name: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Apply pending migrations in timestamp order.
    Up {
        /// How many to apply: a positive number or `all`.
        #[arg(default_value = "all")]
        count: Limit,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Revert the most recently applied migrations.
    Down {
        /// How many to revert: a positive number or `all`.
        #[arg(default_value = "1")]
        count: Limit,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show applied migrations, most recent first.
    History {
        /// How many to show: a positive number or `all`.
        #[arg(default_value = "10")]
        limit: Limit,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show migrations that have not been applied yet.
    New {
        /// How many to show: a positive number or `all`.
        #[arg(default_value = "10")]
        limit: Limit,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings {
        config: cli.config,
        root: cli.root,
        database: cli.database,
    };

    let result = match cli.command {
        Commands::Create { name, yes } => commands::create(&settings, &name, yes),
        Commands::Up { count, yes } => commands::up(&settings, count, yes),
        Commands::Down { count, yes } => commands::down(&settings, count, yes),
        Commands::History { limit, json } => commands::history(&settings, limit, json),
        Commands::New { limit, json } => commands::new(&settings, limit, json),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_env("MIGTREE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
