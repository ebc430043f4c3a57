use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ecotale-cli", version, about = "EcoTale recycling tracker CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a recycling entry
    Record(commands::record::RecordArgs),
    /// Delete a recorded entry
    Delete {
        /// Entry ID
        id: String,
    },
    /// Daily and weekly recycling tasks
    Tasks {
        #[command(subcommand)]
        action: commands::tasks::TasksAction,
    },
    /// Show the daily completion streak
    Streak,
    /// Notification inbox
    Notifications {
        #[command(subcommand)]
        action: commands::notifications::NotificationsAction,
    },
    /// Show recorded entries and totals
    History(commands::history::HistoryArgs),
    /// Local cache maintenance
    Cache {
        #[command(subcommand)]
        action: commands::cache::CacheAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ECOTALE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Record(args) => commands::record::run(args),
        Commands::Delete { id } => commands::delete::run(&id),
        Commands::Tasks { action } => commands::tasks::run(action),
        Commands::Streak => commands::streak::run(),
        Commands::Notifications { action } => commands::notifications::run(action),
        Commands::History(args) => commands::history::run(args),
        Commands::Cache { action } => commands::cache::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
