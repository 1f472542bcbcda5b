mod history_cmd;
mod sync_cmd;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "histsync",
    version,
    about = "End-to-end encrypted shell history, synchronised across your devices"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up this device, joining an existing history when SECRET is given
    Init {
        /// Secret shared with your other devices (generated when omitted)
        secret: Option<String>,
        /// Never contact the sync server
        #[arg(long)]
        offline: bool,
    },
    /// Import existing shell history (bash, zsh, fish, $HISTFILE)
    Import {
        /// Import again even if an import already completed
        #[arg(long)]
        force: bool,
        /// Also read history lines from stdin
        #[arg(long)]
        stdin: bool,
    },
    /// Pull new entries, apply deletions, and answer dump requests
    Sync {
        /// Also push the full local history
        #[arg(long)]
        reupload: bool,
    },
    /// Search history
    Search {
        /// Maximum number of results (0 = unlimited)
        #[arg(short = 'n', long, default_value_t = 25)]
        limit: i64,
        /// Query terms, e.g. `git -push cwd:~/src exit_code:0`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },
    /// Delete matching entries here and on every other device
    Redact {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        query: Vec<String>,
    },
    /// Show device and store status
    Status,
    /// Print the server's banner for this client, if any
    Banner {
        #[arg(long, default_value = "")]
        commit_hash: String,
    },
}

fn or_exit(r: anyhow::Result<i32>) -> i32 {
    r.unwrap_or_else(|e| {
        eprintln!("[histsync] error: {e:#}");
        1
    })
}

fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("HISTSYNC_LOG").unwrap_or_else(|_| "histsync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Commands::Init { secret, offline } => {
            or_exit(sync_cmd::cmd_init(secret.as_deref(), *offline))
        }
        Commands::Import { force, stdin } => or_exit(sync_cmd::cmd_import(*force, *stdin)),
        Commands::Sync { reupload } => or_exit(sync_cmd::cmd_sync(*reupload)),
        Commands::Search { limit, query } => {
            or_exit(history_cmd::cmd_search(&query.join(" "), *limit))
        }
        Commands::Redact { query } => or_exit(history_cmd::cmd_redact(&query.join(" "))),
        Commands::Status => or_exit(history_cmd::cmd_status()),
        Commands::Banner { commit_hash } => or_exit(sync_cmd::cmd_banner(commit_hash)),
    };
    std::process::exit(exit_code);
}
