mod commands;
mod logging;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use logging::LogDestination;
use settings::{AppSettings, SETTINGS_FILENAME};

/// Archives web pages into self-contained bookmark containers.
#[derive(Parser)]
#[command(name = "archiver", version)]
struct Cli {
    /// Settings file (RON). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = SETTINGS_FILENAME)]
    config: PathBuf,

    /// Overrides the data directory from the settings file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a URL and store it in its bookmark container.
    Archive {
        url: String,
        /// Bookmark identifier; derived from the URL when omitted.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        no_readability: bool,
    },
    /// Run the pipeline over a local HTML file and print the article.
    /// Nothing is stored.
    Preview {
        file: PathBuf,
        /// URL the file was saved from; selects site rules and scripts.
        #[arg(long)]
        url: String,
        #[arg(long)]
        no_readability: bool,
    },
    /// Print the props, resources and log of a container.
    Show {
        /// Bookmark identifier or container path.
        target: String,
    },
    /// Load site rules and content scripts and report errors.
    Check,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = AppSettings::load(&cli.config)?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match settings.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    logging::initialize(destination, level);

    match cli.command {
        Command::Archive {
            url,
            id,
            no_readability,
        } => runtime()?.block_on(commands::archive(&settings, &url, id, no_readability)),
        Command::Preview {
            file,
            url,
            no_readability,
        } => runtime()?.block_on(commands::preview(&settings, &file, &url, no_readability)),
        Command::Show { target } => commands::show(&settings, &target),
        Command::Check => commands::check(&settings),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
