//! # CLI Module
//!
//! User-facing commands of the `trackstream` binary. Each command loads what
//! it needs from [`crate::config::Settings`], delegates to the streaming core
//! and reports with the crate's colored output macros.
//!
//! ## Commands
//!
//! - [`serve`] - run the HTTP glue plus the periodic cache sweep
//! - [`fetch`] - stream one track through the cache into a file or stdout
//! - [`list_cache`], [`sweep_cache`], [`purge_cache`] - inspect and maintain
//!   the cache directory
//!
//! ## Usage
//! ```bash
//! trackstream serve
//! trackstream fetch --isrc USUM71703861 --output track.mp3
//! trackstream fetch --title "Song A" --artist "Artist X" > track.mp3
//! trackstream cache list
//! trackstream cache purge ext-USUM71703861
//! ```

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::{config::Settings, error, service::StreamService};

mod cache;
mod fetch;
mod serve;

pub use cache::{list_cache, purge_cache, sweep_cache};
pub use fetch::{FetchRequest, fetch};
pub use serve::serve;

/// Builds the service or exits with a readable message.
async fn open_service(settings: &Settings) -> StreamService {
    match StreamService::from_settings(settings).await {
        Ok(service) => service,
        Err(e) => error!("Cannot open cache at {}. Err: {}", settings.cache.dir.display(), e),
    }
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb
}

/// Human readable byte count, e.g. `7.4 MiB`.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
