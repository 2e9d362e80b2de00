//! Track streaming core
//!
//! Resolves a logical track (title, artists, ISRC) to a raw audio source
//! through an ordered list of providers, transcodes it to MP3 with an external
//! encoder and serves the result as a progressive byte stream out of a bounded
//! on-disk cache. Concurrent requests for the same track share one fetch.
//!
//! # Modules
//!
//! - `providers` / `resolver` - provider clients and ordered fallback
//! - `transcode` / `pipeline` - source reader plus encoder process
//! - `cache` - single-flight cache entries, recovery and eviction
//! - `session` / `service` - progressive readers and the stream entry point
//! - `server` / `api` - HTTP glue
//! - `cli` - commands of the `trackstream` binary
//! - `config`, `error`, `types`, `matching` - shared plumbing
//!
//! # Example
//!
//! ```
//! use trackstream::{config, service::StreamService, types::TrackQuery};
//!
//! #[tokio::main]
//! async fn main() -> trackstream::Res<()> {
//!     config::load_env().await?;
//!     let settings = config::Settings::from_env()?;
//!     let service = StreamService::from_settings(&settings).await?;
//!     let query = TrackQuery::new("Song A", vec!["Artist X".into()]).with_external_id("ISRC123");
//!     let mut stream = service.request_stream(query).await?;
//!     while let Some(chunk) = stream.next_chunk().await? {
//!         // forward chunk
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod matching;
pub mod pipeline;
pub mod providers;
pub mod resolver;
pub mod server;
pub mod service;
pub mod session;
pub mod transcode;
pub mod types;

/// Result alias for the binary surface and configuration loading, where
/// errors are only reported, never matched on.
///
/// The streaming core itself uses [`error::StreamResult`].
pub type Res<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Prints a CLI status line with a blue `o`.
///
/// ```
/// info!("Serving on {}", addr);
/// ```
#[macro_export]
macro_rules! info {
  ($($arg:tt)*) => ({
    use colored::Colorize;
    println!("[{}] {}", "o".blue().bold(), std::format_args!($($arg)*));
  })
}

/// Prints a CLI confirmation line with a green check mark.
#[macro_export]
macro_rules! success {
  ($($arg:tt)*) => ({
    use colored::Colorize;
    println!("[{}] {}", "✓".green().bold(), std::format_args!($($arg)*));
  })
}

/// Prints a red `!` line and exits with status 1.
///
/// Only for failures a CLI command cannot continue from; library code returns
/// errors instead.
///
/// ```
/// error!("Invalid configuration. Err: {}", e);
/// // not reached
/// ```
#[macro_export]
macro_rules! error {
  ($($arg:tt)*) => ({
    use colored::Colorize;
    println!("[{}] {}", "!".red().bold(), std::format_args!($($arg)*));
    std::process::exit(1);
  })
}

/// Prints a yellow `!` line for notices that do not stop the command.
#[macro_export]
macro_rules! warning {
  ($($arg:tt)*) => ({
    use colored::Colorize;
    println!("[{}] {}", "!".yellow().bold(), std::format_args!($($arg)*));
  })
}
