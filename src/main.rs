use std::path::PathBuf;

use clap::{
    CommandFactory, Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use trackstream::{cli, config, error};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::White.on_default() | Effects::BOLD)
        .usage(AnsiColor::White.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightGreen.on_default())
}

#[derive(Parser, Debug, Clone)]
#[clap(
  version = env!("CARGO_PKG_VERSION"),
  name=env!("CARGO_PKG_NAME"),
  bin_name=env!("CARGO_PKG_NAME"),
  about=env!("CARGO_PKG_DESCRIPTION"),
  styles=styles(),
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve streams over HTTP
    Serve,

    /// Resolve, transcode and cache one track
    Fetch(FetchOptions),

    /// Inspect and maintain the cache directory
    Cache(CacheOptions),

    /// Get shell completions
    Completions(CompletionsOption),
}

#[derive(Parser, Debug, Clone)]
pub struct FetchOptions {
    /// ISRC of the recording
    #[clap(long)]
    isrc: Option<String>,

    /// Track title
    #[clap(long)]
    title: Option<String>,

    /// Artist name; can be repeated
    #[clap(long = "artist", num_args = 1)]
    artists: Vec<String>,

    /// Track length in seconds, used to reject wrong matches
    #[clap(long)]
    duration: Option<u32>,

    /// Write the MP3 to this file instead of stdout
    #[clap(long, short)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheOptions {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheSubcommand {
    /// List cached entries
    List,

    /// Evict least recently used entries until the size budget holds
    Sweep,

    /// Remove one entry by key
    Purge { key: String },
}

#[derive(Parser, Debug, Clone)]
pub struct CompletionsOption {
    shell: Shell,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trackstream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = config::load_env().await {
        error!("Cannot load environment. Err: {}", e);
    }

    let cli = Cli::parse();

    if let Command::Completions(opt) = &cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(opt.shell, &mut cmd, name, &mut std::io::stdout());
        return;
    }

    let settings = match config::Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => error!("Invalid configuration. Err: {}", e),
    };

    match cli.command {
        Command::Serve => cli::serve(&settings).await,
        Command::Fetch(opt) => {
            if opt.isrc.is_none() && opt.title.is_none() {
                error!("Pass --isrc or --title to fetch a track.");
            }
            let request = cli::FetchRequest {
                isrc: opt.isrc,
                title: opt.title,
                artists: opt.artists,
                duration: opt.duration,
                output: opt.output,
            };
            cli::fetch(&settings, request).await
        }
        Command::Cache(opt) => match opt.command {
            CacheSubcommand::List => cli::list_cache(&settings).await,
            CacheSubcommand::Sweep => cli::sweep_cache(&settings).await,
            CacheSubcommand::Purge { key } => cli::purge_cache(&settings, &key).await,
        },
        Command::Completions(_) => {}
    }
}
