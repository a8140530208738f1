//! mailmerge - query configured mail-merge datasources from the command line
//!
//! Loads datasource definitions from a YAML file, resolves one of them and
//! prints its schema or the datasets a query returns.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::{ContentsCommand, FindCommand, LookupCommand, SchemaCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "MAILMERGE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "MAILMERGE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema and key columns of a datasource
    Schema(SchemaCommand),
    /// Print every dataset of a datasource
    Contents(ContentsCommand),
    /// Print datasets matching COLUMN=GLOB conditions
    Find(FindCommand),
    /// Print datasets for the given keys
    Lookup(LookupCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes full control when set
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(format!(
            "mailmerge={level},\
             mailmerge_query={level},\
             mailmerge_query_postgres={level},\
             mailmerge_query_sqlite={level},\
             tokio_postgres=warn",
            level = cli.log_level
        ))?,
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Schema(cmd) => cmd.execute(),
        Commands::Contents(cmd) => cmd.execute(),
        Commands::Find(cmd) => cmd.execute(),
        Commands::Lookup(cmd) => cmd.execute(),
    }
}
