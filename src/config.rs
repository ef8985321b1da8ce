use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Event stream endpoint, e.g. "https://example.com/stream"
    pub url: String,
    /// Resume from this event ID on the first request
    pub last_event_id: String,
    /// Reconnect delay until the server sends `retry`
    pub reconnect_delay_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            last_event_id: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_secs: 10,
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    eventsource::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

impl AppConfig {
    /// Config file, then environment, then the first command-line argument
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "eventsource.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());

        if let Some(url) = std::env::args().nth(1) {
            config.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Environment variables override the config file
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("EVENTSOURCE_URL") {
            self.url = url;
        }
        if let Some(id) = var("LAST_EVENT_ID") {
            self.last_event_id = id;
        }
        if let Some(delay) = var("RECONNECT_DELAY") {
            if let Ok(ms) = delay.parse() {
                self.reconnect_delay_ms = ms;
            }
        }
        if let Some(timeout) = var("CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("Usage: eventsource <url> (or set EVENTSOURCE_URL)");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
