use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// refresh-relay - authenticated HTTP client playground
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    /// Login endpoint path
    #[arg(long, env = "LOGIN_PATH", default_value = "/auth/login")]
    pub login_path: String,

    /// Refresh endpoint path
    #[arg(long, env = "REFRESH_PATH", default_value = "/auth/refresh-token")]
    pub refresh_path: String,

    /// Logout endpoint path
    #[arg(long, env = "LOGOUT_PATH", default_value = "/auth/logout")]
    pub logout_path: String,

    /// Protected endpoint path
    #[arg(long, env = "PROTECTED_PATH", default_value = "/user")]
    pub protected_path: String,

    /// Authorization scheme
    #[arg(long, env = "TOKEN_TYPE", default_value = "Bearer")]
    pub token_type: String,

    /// Path to the credential SQLite database
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Refresh exchange timeout in seconds (0 disables)
    #[arg(long, env = "REFRESH_TIMEOUT", default_value = "30")]
    pub refresh_timeout: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the returned token pair
    Login {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Send protected requests through the refresh coordinator
    Request {
        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
    /// Log out and clear stored tokens
    Logout,
    /// Show whether tokens are stored
    Status,
}

/// Static endpoint and header configuration consumed by the coordinator
#[derive(Clone, Debug, PartialEq)]
pub struct AuthConfig {
    pub login_endpoint: String,
    pub refresh_endpoint: String,
    pub logout_endpoint: String,
    pub protected_endpoint: String,

    /// Scheme placed before the token, e.g. `Bearer`
    pub token_type: String,
    pub header_name: String,

    // Credential store keys
    pub access_token_key: String,
    pub refresh_token_key: String,

    /// Upper bound on one refresh exchange; `None` waits indefinitely
    pub refresh_timeout: Option<Duration>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from_base_url("http://localhost:3000")
    }
}

impl AuthConfig {
    /// Default endpoint layout under `base_url`
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login_endpoint: format!("{}/auth/login", base),
            refresh_endpoint: format!("{}/auth/refresh-token", base),
            logout_endpoint: format!("{}/auth/logout", base),
            protected_endpoint: format!("{}/user", base),
            token_type: "Bearer".to_string(),
            header_name: "Authorization".to_string(),
            access_token_key: "accessToken".to_string(),
            refresh_token_key: "refreshToken".to_string(),
            refresh_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Header value for `token`
    pub fn authorization_value(&self, token: &str) -> String {
        format!("{} {}", self.token_type, token)
    }

    /// Whether `url` targets the login endpoint
    pub fn is_login_endpoint(&self, url: &str) -> bool {
        same_endpoint(url, &self.login_endpoint)
    }
}

/// Compare two URLs after normalization, falling back to string equality
fn same_endpoint(a: &str, b: &str) -> bool {
    match (reqwest::Url::parse(a), reqwest::Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub auth: AuthConfig,

    // Storage
    pub db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let base = args.base_url.trim_end_matches('/');

        let auth = AuthConfig {
            login_endpoint: join_url(base, &args.login_path),
            refresh_endpoint: join_url(base, &args.refresh_path),
            logout_endpoint: join_url(base, &args.logout_path),
            protected_endpoint: join_url(base, &args.protected_path),
            token_type: args.token_type.clone(),
            refresh_timeout: match args.refresh_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ..AuthConfig::from_base_url(base)
        };

        let db_file = match args.db_file.as_deref() {
            Some(path) => expand_tilde(path),
            None => default_db_path().context(
                "Could not determine a data directory (use -d or set CREDENTIALS_DB_FILE)",
            )?,
        };

        Ok(Config {
            auth,
            db_file,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for endpoint in [
            &self.auth.login_endpoint,
            &self.auth.refresh_endpoint,
            &self.auth.logout_endpoint,
            &self.auth.protected_endpoint,
        ] {
            reqwest::Url::parse(endpoint)
                .with_context(|| format!("Invalid endpoint URL: {}", endpoint))?;
        }

        if self.auth.token_type.trim().is_empty() {
            anyhow::bail!("TOKEN_TYPE cannot be empty");
        }

        Ok(())
    }
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base, path.trim_start_matches('/'))
}

/// Default credential database under the platform data directory
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("refresh-relay").join("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_auth_config() {
        let config = AuthConfig::default();
        assert_eq!(config.login_endpoint, "http://localhost:3000/auth/login");
        assert_eq!(config.refresh_endpoint, "http://localhost:3000/auth/refresh-token");
        assert_eq!(config.logout_endpoint, "http://localhost:3000/auth/logout");
        assert_eq!(config.protected_endpoint, "http://localhost:3000/user");
        assert_eq!(config.token_type, "Bearer");
        assert_eq!(config.access_token_key, "accessToken");
        assert_eq!(config.refresh_token_key, "refreshToken");
        assert_eq!(config.refresh_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_authorization_value() {
        let mut config = AuthConfig::default();
        assert_eq!(config.authorization_value("abc"), "Bearer abc");

        config.token_type = "JWT".to_string();
        assert_eq!(config.authorization_value("abc"), "JWT abc");
    }

    #[test]
    fn test_is_login_endpoint() {
        let config = AuthConfig::from_base_url("http://localhost:3000/");
        assert!(config.is_login_endpoint("http://localhost:3000/auth/login"));
        assert!(config.is_login_endpoint("HTTP://LOCALHOST:3000/auth/login"));
        assert!(!config.is_login_endpoint("http://localhost:3000/auth/logout"));
        assert!(!config.is_login_endpoint("http://localhost:3000/auth/login?x=1"));
        assert!(!config.is_login_endpoint("not a url"));
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));

        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h", "/a"), "http://h/a");
        assert_eq!(join_url("http://h", "a"), "http://h/a");
        assert_eq!(join_url("http://h", "https://other/a"), "https://other/a");
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format("invalid"), LogFormat::Text);
        assert_eq!(parse_log_format(""), LogFormat::Text);
    }

    #[test]
    fn test_from_args() {
        let args = parse(&[
            "refresh-relay",
            "--base-url",
            "http://api.test/",
            "--protected-path",
            "/me",
            "--token-type",
            "JWT",
            "--refresh-timeout",
            "0",
            "--log-format",
            "json",
            "-d",
            "/tmp/creds.sqlite3",
            "request",
            "-n",
            "3",
        ]);
        assert_eq!(args.command, Command::Request { count: 3 });

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.auth.login_endpoint, "http://api.test/auth/login");
        assert_eq!(config.auth.protected_endpoint, "http://api.test/me");
        assert_eq!(config.auth.token_type, "JWT");
        assert_eq!(config.auth.header_name, "Authorization");
        assert_eq!(config.auth.refresh_timeout, None);
        assert_eq!(config.db_file, PathBuf::from("/tmp/creds.sqlite3"));
        assert_eq!(config.log_format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn test_login_subcommand() {
        let args = parse(&["refresh-relay", "login", "-e", "a@b.c"]);
        assert_eq!(
            args.command,
            Command::Login {
                email: Some("a@b.c".to_string()),
                password: None
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let args = parse(&["refresh-relay", "-u", "not a url", "-d", "/tmp/x", "status"]);
        let config = Config::from_args(&args).unwrap();
        assert!(config.validate().is_err());
    }
}
