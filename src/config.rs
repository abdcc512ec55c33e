use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

use crate::error::MAX_VOLUME;

/// When a session leaves voice on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeavePolicy {
    /// Leave once no listener is left in the voice channel.
    #[default]
    OnEmpty,
    /// Leave as soon as the queue runs out.
    OnQueueEnd,
    /// Only `stop` disconnects.
    Manual,
}

impl FromStr for LeavePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_empty" => Ok(Self::OnEmpty),
            "on_queue_end" => Ok(Self::OnQueueEnd),
            "manual" => Ok(Self::Manual),
            other => anyhow::bail!("Unknown leave policy '{}', expected on_empty, on_queue_end or manual", other),
        }
    }
}

impl fmt::Display for LeavePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OnEmpty => "on_empty",
            Self::OnQueueEnd => "on_queue_end",
            Self::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Register commands on one guild instead of globally

    // Playback
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub leave_policy: LeavePolicy,

    // Sources
    pub search_timeout: Duration,

    // Display
    pub queue_display_limit: usize,
}

impl Config {
    /// Reads `.env` and the process environment, then validates.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()
                .context("APPLICATION_ID must be a number")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            default_volume: var("DEFAULT_VOLUME", "50")
                .parse()
                .context("DEFAULT_VOLUME must be a whole percentage")?,
            max_queue_size: var("MAX_QUEUE_SIZE", "1000").parse()?,
            leave_policy: var("LEAVE_POLICY", "on_empty").parse()?,

            search_timeout: humantime::parse_duration(&var("SEARCH_TIMEOUT", "20s"))
                .context("SEARCH_TIMEOUT must be a duration such as 20s")?,

            queue_display_limit: var("QUEUE_DISPLAY_LIMIT", "10").parse()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!("Default volume must be between 0 and {}, got: {}", MAX_VOLUME, self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.search_timeout.is_zero() {
            anyhow::bail!("Search timeout must be greater than 0");
        }

        if self.queue_display_limit == 0 {
            anyhow::bail!("Queue display limit must be greater than 0");
        }

        Ok(())
    }

    /// Configuration for logging, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol, {} max queue, leave {}\n  \
            Search timeout: {}, queue shows {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.leave_policy,
            humantime::format_duration(self.search_timeout),
            self.queue_display_limit
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 50,
            max_queue_size: 1000,
            leave_policy: LeavePolicy::OnEmpty,

            search_timeout: Duration::from_secs(20),

            queue_display_limit: 10,
        }
    }
}
