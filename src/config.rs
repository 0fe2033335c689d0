use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::chat::{MESSAGE_LIMIT, ViewSettings};

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Messages per page
    #[arg(long)]
    pub message_limit: Option<usize>,

    /// Minimum duration of a history page request, in milliseconds
    #[arg(long)]
    pub page_delay_ms: Option<u64>,

    /// Number of demo messages to seed on startup
    #[arg(long)]
    pub seed_demo_messages: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub title: String,
    pub request_timeout_secs: u64,
    /// Views nobody listens to are dropped after this long.
    pub view_idle_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub message_limit: usize,
    pub page_delay_ms: u64,
    pub event_buffer: usize,
    pub seed_demo_messages: u32,
}

impl FeedConfig {
    #[must_use]
    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            message_limit: self.message_limit.max(1),
            page_delay: Duration::from_millis(self.page_delay_ms),
            event_buffer: self.event_buffer.max(1),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn view_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.view_idle_secs)
    }
}

impl AppConfig {
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.title", "Chat")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("server.view_idle_secs", 600)?
            .set_default("feed.message_limit", MESSAGE_LIMIT as u64)?
            .set_default("feed.page_delay_ms", 2000)?
            .set_default("feed.event_buffer", 64)?
            .set_default("feed.seed_demo_messages", 0)?;

        // Explicit file must exist; the working-directory fallback is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            }
            None => builder,
        };

        // CHAT_SERVER__PORT=8000, CHAT_FEED__PAGE_DELAY_MS=0, ...
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .separator("__")
                .try_parsing(true),
        );

        // Priority: CLI flag > CLI env var > CHAT_ env > config file > defaults.
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(limit) = cli.message_limit {
            builder = builder.set_override("feed.message_limit", limit as u64)?;
        }
        if let Some(delay) = cli.page_delay_ms {
            builder = builder.set_override("feed.page_delay_ms", delay)?;
        }
        if let Some(seed) = cli.seed_demo_messages {
            builder = builder.set_override("feed.seed_demo_messages", seed)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
