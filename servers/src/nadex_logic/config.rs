use clap::Parser;
use lib_market::ApiConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Nadex Lightstreamer Relay Server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "NADEX_PORT", help = "Port to listen on for downstream consumer connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "NADEX_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "NADEX_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "NADEX_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "NADEX_USERNAME", help = "Account username for authentication.")]
    pub username: Option<String>,

    #[clap(long, env = "NADEX_PASSWORD", help = "Account password for authentication.")]
    pub password: Option<String>,

    #[clap(long, env = "NADEX_USER_ID", help = "Account user id carried in subscription keys.")]
    pub user_id: Option<String>,

    #[clap(long, env = "NADEX_AUTH_URL", help = "Authentication endpoint.")]
    pub auth_url: Option<String>,

    #[clap(long, env = "NADEX_SESSION_URL", help = "Lightstreamer session-creation endpoint.")]
    pub session_url: Option<String>,

    #[clap(long, env = "NADEX_MARKET_TREE_URL", help = "Full market hierarchy tree endpoint.")]
    pub market_tree_url: Option<String>,

    #[clap(long, env = "NADEX_NAVIGATION_URL", help = "Per-market navigation endpoint prefix.")]
    pub navigation_url: Option<String>,

    #[clap(long, env = "NADEX_PING_INTERVAL", help = "Seconds between upstream keepalive requests.")]
    pub ping_interval_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            user_id: other.user_id.or(self.user_id),
            auth_url: other.auth_url.or(self.auth_url),
            session_url: other.session_url.or(self.session_url),
            market_tree_url: other.market_tree_url.or(self.market_tree_url),
            navigation_url: other.navigation_url.or(self.navigation_url),
            ping_interval_seconds: other.ping_interval_seconds.or(self.ping_interval_seconds),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn ping_interval_seconds(&self) -> u64 {
        self.ping_interval_seconds.unwrap_or(30)
    }

    /// Builds the collaborator endpoint config. Credentials have no
    /// defaults; a missing one is a startup error.
    pub fn api_config(&self) -> anyhow::Result<ApiConfig> {
        let require = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| anyhow::anyhow!("missing required configuration: {name}"))
        };
        Ok(ApiConfig {
            auth_url: require(&self.auth_url, "NADEX_AUTH_URL")?,
            session_url: require(&self.session_url, "NADEX_SESSION_URL")?,
            tree_url: require(&self.market_tree_url, "NADEX_MARKET_TREE_URL")?,
            navigation_url: require(&self.navigation_url, "NADEX_NAVIGATION_URL")?,
            username: require(&self.username, "NADEX_USERNAME")?,
            password: require(&self.password, "NADEX_PASSWORD")?,
            user_id: require(&self.user_id, "NADEX_USER_ID")?,
        })
    }
}

fn default_config() -> Config {
    Config {
        port: Some(9003),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        auth_url: Some("https://demo-trade.nadex.com/iDeal/v2/security/authenticate".to_string()),
        session_url: Some("https://demo-upd.nadex.com/lightstreamer/create_session.js".to_string()),
        market_tree_url: Some("https://demo-trade.nadex.com/iDeal/markets/hierarchy/tree/full".to_string()),
        navigation_url: Some("https://demo-trade.nadex.com/iDeal/markets/navigation".to_string()),
        ping_interval_seconds: Some(30),
        ..Default::default()
    }
}

pub fn load_config() -> Config {
    // 1. Defaults, lowest precedence.
    let mut current_config = default_config();

    // 2. CLI arguments (clap also pulls in environment variables).
    let cli_args = Config::parse();

    // 3. Optional JSON config file, overriding defaults but not CLI/env.
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_nadex.conf"));

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    // 4. CLI and environment variables win.
    current_config.merge(cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_sources_override_earlier_ones() {
        let file = Config {
            port: Some(9100),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let cli = Config {
            port: Some(9200),
            ..Default::default()
        };
        let merged = default_config().merge(file).merge(cli);
        assert_eq!(merged.port(), 9200);
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        // Untouched values keep their defaults.
        assert_eq!(merged.ping_interval_seconds(), 30);
    }

    #[test]
    fn api_config_requires_credentials() {
        let config = default_config();
        assert!(config.api_config().is_err());

        let config = default_config().merge(Config {
            username: Some("demo-user".to_string()),
            password: Some("hunter2".to_string()),
            user_id: Some("USER01".to_string()),
            ..Default::default()
        });
        let api = config.api_config().unwrap();
        assert_eq!(api.user_id, "USER01");
        assert!(api.auth_url.contains("/security/authenticate"));
    }
}
