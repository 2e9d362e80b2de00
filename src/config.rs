//! Configuration management for the streaming core.
//!
//! Values are read from environment variables, optionally seeded from a `.env`
//! file in the local data directory. The configuration system follows a
//! hierarchical approach:
//! 1. Environment variables (highest priority)
//! 2. `.env` file in the local data directory
//! 3. Application defaults

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{Res, types::ProviderKind};

/// Tidal download mirrors, fastest/most reliable first.
pub const DEFAULT_TIDAL_MIRRORS: &[&str] = &[
    "https://tidal.kinoplus.online",
    "https://tidal-api.binimum.org",
    "https://wolf.qqdl.site",
    "https://maus.qqdl.site",
    "https://vogel.qqdl.site",
    "https://katze.qqdl.site",
    "https://hund.qqdl.site",
];

/// Loads environment variables from a `.env` file in the local data directory.
///
/// The file is looked up at:
/// - Linux: `~/.local/share/trackstream/.env`
/// - macOS: `~/Library/Application Support/trackstream/.env`
/// - Windows: `%LOCALAPPDATA%/trackstream/.env`
///
/// A missing file is not an error; variables already present in the process
/// environment are never overridden.
///
/// # Errors
///
/// Returns an error if the data directory cannot be created or the `.env`
/// file exists but cannot be parsed.
pub async fn load_env() -> Res<()> {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("trackstream/.env");
    if let Some(parent) = path.parent() {
        async_fs::create_dir_all(parent).await?;
    }

    if async_fs::metadata(&path).await.is_ok() {
        dotenv::from_path(&path)?;
    }
    Ok(())
}

/// How the external encoder is invoked.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub program: PathBuf,
    /// Argument template; `{bitrate}` is replaced with the target bitrate.
    pub args: Vec<String>,
    pub bitrate: String,
    /// Force-terminate the encoder after this long without output.
    pub idle_timeout: Duration,
}

impl EncoderSettings {
    /// ffmpeg reading the raw source on stdin and writing MP3 to stdout.
    pub fn ffmpeg(program: impl Into<PathBuf>, bitrate: impl Into<String>) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-vn",
            "-acodec",
            "libmp3lame",
            "-b:a",
            "{bitrate}",
            "-f",
            "mp3",
            "pipe:1",
        ];
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            bitrate: bitrate.into(),
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Arguments with the bitrate placeholder substituted.
    pub fn resolved_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{bitrate}", &self.bitrate))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub max_bytes: u64,
    pub sweep_interval: Duration,
    /// Upper bound of a single wait before a blocked reader re-checks its entry.
    pub reader_liveness: Duration,
}

impl CacheSettings {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            sweep_interval: Duration::from_secs(30 * 60),
            reader_liveness: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub order: Vec<ProviderKind>,
    pub similarity_floor: f64,
    pub cooldown: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            order: vec![ProviderKind::Tidal, ProviderKind::Deezer],
            similarity_floor: 0.6,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TidalSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub api_url: String,
    pub country_code: String,
    pub quality: String,
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeezerSettings {
    pub public_api_url: String,
    pub download_api_url: String,
}

/// Everything the core consumes at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_addr: String,
    pub provider_timeout: Duration,
    pub encoder: EncoderSettings,
    pub cache: CacheSettings,
    pub resolver: ResolverSettings,
    pub tidal: TidalSettings,
    pub deezer: DeezerSettings,
}

impl Settings {
    /// Builds the settings from the process environment.
    ///
    /// # Errors
    ///
    /// Fails on malformed numbers and on unknown names in `PROVIDER_ORDER`.
    pub fn from_env() -> Res<Self> {
        let mut encoder = EncoderSettings::ffmpeg(
            env_or("FFMPEG_PATH", "ffmpeg"),
            env_or("MP3_BITRATE", "320k"),
        );
        encoder.idle_timeout = Duration::from_secs(env_parse("ENCODER_IDLE_TIMEOUT_SECS", 30)?);

        let cache_dir = match env::var("CACHE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let mut dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
                dir.push("trackstream");
                dir
            }
        };
        let max_mb: u64 = env_parse("CACHE_MAX_SIZE_MB", 2048)?;
        let mut cache = CacheSettings::new(cache_dir, max_mb * 1024 * 1024);
        cache.sweep_interval = Duration::from_secs(env_parse("CACHE_SWEEP_INTERVAL_SECS", 1800)?);
        cache.reader_liveness = Duration::from_millis(env_parse("READER_LIVENESS_MS", 1000)?);

        let resolver = ResolverSettings {
            order: parse_provider_order(&env_or("PROVIDER_ORDER", "tidal,deezer"))?,
            similarity_floor: env_parse("MATCH_SIMILARITY_FLOOR", 0.6)?,
            cooldown: Duration::from_secs(env_parse("PROVIDER_COOLDOWN_SECS", 60)?),
        };

        let mirrors = match env::var("TIDAL_MIRRORS") {
            Ok(list) => split_list(&list),
            Err(_) => DEFAULT_TIDAL_MIRRORS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            server_addr: env_or("SERVER_ADDRESS", "0.0.0.0:8000"),
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS", 30)?),
            encoder,
            cache,
            resolver,
            tidal: TidalSettings {
                client_id: env_or("TIDAL_CLIENT_ID", ""),
                client_secret: env_or("TIDAL_CLIENT_SECRET", ""),
                auth_url: env_or("TIDAL_AUTH_URL", "https://auth.tidal.com/v1/oauth2/token"),
                api_url: env_or("TIDAL_API_URL", "https://api.tidal.com"),
                country_code: env_or("TIDAL_COUNTRY_CODE", "US"),
                quality: env_or("TIDAL_QUALITY", "LOSSLESS"),
                mirrors,
            },
            deezer: DeezerSettings {
                public_api_url: env_or("DEEZER_PUBLIC_API_URL", "https://api.deezer.com"),
                download_api_url: env_or("DEEZER_API_URL", "https://api.deezmate.com"),
            },
        })
    }
}

/// Parses a comma-separated provider list, e.g. `"tidal, deezer"`.
pub fn parse_provider_order(value: &str) -> Res<Vec<ProviderKind>> {
    let mut order = Vec::new();
    for name in split_list(value) {
        let kind: ProviderKind = name.parse()?;
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    if order.is_empty() {
        return Err("PROVIDER_ORDER names no provider".into());
    }
    Ok(order)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Res<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{} has an invalid value '{}': {}", name, raw, e).into()),
        Err(_) => Ok(default),
    }
}
