use clap::{ArgAction, Parser, Subcommand};
use commands::{clear, config, daemon, export, sync};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "bangumi-sync")]
#[command(about = "Incrementally mirror a Bangumi collection into local raw and analytics stores")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle
    #[command(long_about = "Fetch every configured (category, status) pair from the Bangumi API, merge new and changed entries into the local store and print a per-pair summary. Unfinished pairs resume from their saved cursor. Ctrl-C stops the run between pages.")]
    Sync {
        /// Ignore saved cursors and start every pair from the first page
        #[arg(long, action = ArgAction::SetTrue)]
        full_resync: bool,

        /// Subject type code to sync instead of the configured ones (repeatable)
        #[arg(long = "subject-type", value_name = "CODE")]
        subject_types: Vec<u8>,

        /// Collection type code to sync instead of the configured ones (repeatable)
        #[arg(long = "collection-type", value_name = "CODE")]
        collection_types: Vec<u8>,

        /// Number of pairs synced concurrently
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run scheduled syncs in the foreground
    #[command(long_about = "Keep running and sync on a cron schedule. An initial sync runs on startup unless --no-startup-sync is given or the scheduler config disables it.")]
    Daemon {
        /// Cron schedule with seconds (e.g. '0 0 */6 * * *' for every 6 hours)
        #[arg(long, value_name = "SCHEDULE")]
        schedule: Option<String>,

        /// Skip the initial sync on startup
        #[arg(long, action = ArgAction::SetTrue)]
        no_startup_sync: bool,

        /// Write logs to the daily-rotated daemon log file instead of stderr
        #[arg(long, action = ArgAction::SetTrue)]
        log_file: bool,
    },
    /// Export stored collections to CSV
    #[command(long_about = "Write raw_collections.csv, analytics_collections.csv and category_summary.csv from the local store.")]
    Export {
        /// Target directory (defaults to the data export directory)
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,
    },
    /// Manage configuration and the access token
    Config {
        #[command(subcommand)]
        cmd: Option<ConfigCommands>,
    },
    /// Clear stored data
    #[command(long_about = "Clear stored collections, sync cursors or credentials. Clearing cursors keeps stored rows but makes the next run start every pair from the first page.")]
    Clear {
        /// Clear everything
        #[arg(long, action = ArgAction::SetTrue)]
        all: bool,

        /// Delete stored collection documents
        #[arg(long, action = ArgAction::SetTrue)]
        store: bool,

        /// Reset sync cursors only
        #[arg(long, action = ArgAction::SetTrue)]
        cursors: bool,

        /// Delete stored credentials
        #[arg(long, action = ArgAction::SetTrue)]
        credentials: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create a configuration file
    Init {
        /// Bangumi username or numeric user id (prompted when omitted)
        #[arg(long)]
        username: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },

    /// Show the current configuration (the token is masked)
    Show {
        /// Show the access token unmasked
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,
    },

    /// Store a Bangumi access token
    #[command(long_about = "Store a personal access token from https://next.bgm.tv/demo/access-token. Without a token only public collection entries are visible. The BANGUMI_ACCESS_TOKEN environment variable takes precedence over the stored token.")]
    Token {
        /// Token value (prompted without echo when omitted)
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Daemon { log_file: true, .. } => Some(bangumi_sync_config::PathManager::default().daemon_log_file()),
        _ => None,
    };
    logging::init_logging_with_file(cli.verbose, cli.quiet, log_file).map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::Sync {
            full_resync,
            subject_types,
            collection_types,
            workers,
        } => sync::run_sync(full_resync, subject_types, collection_types, workers, &output).await,
        Commands::Daemon { schedule, no_startup_sync, .. } => daemon::run_daemon(schedule, no_startup_sync, &output).await,
        Commands::Export { dir } => export::run_export(dir, &output).await,
        Commands::Config { cmd } => {
            let cmd = cmd.unwrap_or(ConfigCommands::Show { full: false });
            config::run_config(cmd, &output).await
        }
        Commands::Clear {
            all,
            store,
            cursors,
            credentials,
        } => clear::run_clear(all, store, cursors, credentials, &output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_accepts_repeated_type_filters() {
        let cli = Cli::try_parse_from([
            "bangumi-sync",
            "sync",
            "--subject-type",
            "2",
            "--subject-type",
            "6",
            "--collection-type",
            "3",
            "--workers",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                subject_types,
                collection_types,
                workers,
                full_resync,
            } => {
                assert_eq!(subject_types, vec![2, 6]);
                assert_eq!(collection_types, vec![3]);
                assert_eq!(workers, Some(4));
                assert!(!full_resync);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn test_global_output_flag() {
        let cli = Cli::try_parse_from(["bangumi-sync", "export", "--output", "json-pretty"]).unwrap();
        assert_eq!(cli.output, output::OutputFormat::JsonPretty);
    }
}
