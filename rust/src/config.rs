use clap::{Arg, ArgAction, ArgMatches, Command, ValueEnum};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FAX_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
pub const CONFIG_FILE_ENV: &str = "FAXBOT_MCP_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Stdio,
    #[value(alias = "streamableHttp", alias = "http")]
    #[serde(alias = "streamableHttp", alias = "http")]
    StreamableHttp,
    Sse,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Sse => 3003,
            Self::Stdio | Self::StreamableHttp => 3004,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsConfig {
    Disabled,
    AllowAll,
    AllowList { raw: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub issuer: String,
    pub audience: String,
    pub jwks_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub fax_api_url: String,
    pub api_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub session_timeout: Duration,
    pub oauth: Option<OAuthSettings>,
    pub max_body_bytes: usize,
    pub streamable_http_path: String,
    pub sse_path: String,
    pub message_path: String,
    pub cors: CorsConfig,
    pub health_endpoints: Vec<String>,
    pub log_level: LogLevel,
}

impl Config {
    /// Effective settings for the startup log, credential redacted.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("transport: {}", self.transport.as_str()),
            format!("faxApiUrl: {}", self.fax_api_url),
            format!(
                "apiKey: {}",
                if self.api_key.is_some() { "<set>" } else { "<unset>" }
            ),
        ];
        if self.transport != Transport::Stdio {
            lines.push(format!("listen: {}:{}", self.host, self.port));
            lines.push(format!("maxBodyBytes: {}", self.max_body_bytes));
            lines.push(format!("cors: {:?}", self.cors));
            lines.push(format!("healthEndpoints: {:?}", self.health_endpoints));
        }
        match self.transport {
            Transport::StreamableHttp => {
                lines.push(format!("streamableHttpPath: {}", self.streamable_http_path));
                lines.push(format!("sessionTimeout: {}ms", self.session_timeout.as_millis()));
            }
            Transport::Sse => {
                lines.push(format!("ssePath: {}", self.sse_path));
                lines.push(format!("messagePath: {}", self.message_path));
                if let Some(oauth) = &self.oauth {
                    lines.push(format!("oauthIssuer: {}", oauth.issuer));
                    lines.push(format!("oauthAudience: {}", oauth.audience));
                }
            }
            Transport::Stdio => {}
        }
        lines
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{key} must be {expected}, received: {value}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("the sse transport requires --oauthIssuer and --oauthAudience")]
    MissingOAuth,
}

impl ConfigError {
    fn invalid(key: &'static str, expected: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            expected,
            value: value.into(),
        }
    }
}

/// Settings loadable from a TOML file; same keys as the flags, in snake_case.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    transport: Option<Transport>,
    fax_api_url: Option<String>,
    api_key: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    session_timeout_ms: Option<u64>,
    oauth_issuer: Option<String>,
    oauth_audience: Option<String>,
    oauth_jwks_url: Option<String>,
    max_body_bytes: Option<usize>,
    streamable_http_path: Option<String>,
    sse_path: Option<String>,
    message_path: Option<String>,
    cors: Option<Vec<String>>,
    health_endpoints: Option<Vec<String>>,
    log_level: Option<LogLevel>,
}

pub fn parse_config() -> Result<Config, ConfigError> {
    let raw_args: Vec<String> = env::args().collect();
    parse_config_from(raw_args, |key| env::var(key).ok())
}

/// Layered lookup: CLI flag, then environment, then config file, then default.
struct Layers<'a, E> {
    matches: &'a ArgMatches,
    env: E,
    file: FileConfig,
}

impl<E: Fn(&str) -> Option<String>> Layers<'_, E> {
    fn string(
        &self,
        arg: &str,
        env_key: Option<&str>,
        file: impl FnOnce(&FileConfig) -> Option<String>,
    ) -> Option<String> {
        self.matches
            .get_one::<String>(arg)
            .cloned()
            .or_else(|| env_key.and_then(|key| (self.env)(key)))
            .filter(|value| !value.trim().is_empty())
            .or_else(|| file(&self.file))
    }
}

fn parse_config_from(
    raw_args: Vec<String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let cors_input = parse_cors_flags(&raw_args);
    let matches = build_cli().try_get_matches_from(raw_args)?;

    let file_path = matches
        .get_one::<String>("config")
        .cloned()
        .or_else(|| env_lookup(CONFIG_FILE_ENV))
        .map(PathBuf::from);
    let file = match file_path {
        Some(path) => load_file_config(&path)?,
        None => FileConfig::default(),
    };
    let layers = Layers {
        matches: &matches,
        env: env_lookup,
        file,
    };

    let transport = match matches.get_one::<Transport>("transport").copied() {
        Some(transport) => transport,
        None => match (layers.env)("MCP_TRANSPORT").filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => Transport::from_str(raw.trim(), true).map_err(|_| {
                ConfigError::invalid("MCP_TRANSPORT", "stdio, streamable-http or sse", raw)
            })?,
            None => layers.file.transport.unwrap_or(Transport::Stdio),
        },
    };

    let fax_api_url = layers
        .string("faxApiUrl", Some("FAX_API_URL"), |file| file.fax_api_url.clone())
        .unwrap_or_else(|| DEFAULT_FAX_API_URL.to_string());
    validate_base_url(&fax_api_url)?;

    let api_key = layers.string("apiKey", Some("API_KEY"), |file| file.api_key.clone());
    let host = layers
        .string("host", Some("HOST"), |file| file.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = match layers.string("port", Some("PORT"), |file| {
        file.port.map(|port| port.to_string())
    }) {
        Some(raw) => parse_port(&raw)?,
        None => transport.default_port(),
    };

    let session_timeout_ms = match layers.string(
        "sessionTimeout",
        Some("MCP_SESSION_TIMEOUT_MS"),
        |file| file.session_timeout_ms.map(|ms| ms.to_string()),
    ) {
        Some(raw) => parse_positive("sessionTimeout", &raw)?,
        None => DEFAULT_SESSION_TIMEOUT_MS,
    };

    let max_body_bytes = match layers.string("maxBodyBytes", Some("MAX_REQUEST_BYTES"), |file| {
        file.max_body_bytes.map(|bytes| bytes.to_string())
    }) {
        Some(raw) => parse_positive("maxBodyBytes", &raw)? as usize,
        None => DEFAULT_MAX_BODY_BYTES,
    };

    let issuer = layers.string("oauthIssuer", Some("OAUTH_ISSUER"), |file| {
        file.oauth_issuer.clone()
    });
    let audience = layers.string("oauthAudience", Some("OAUTH_AUDIENCE"), |file| {
        file.oauth_audience.clone()
    });
    let jwks_url = layers.string("oauthJwksUrl", Some("OAUTH_JWKS_URL"), |file| {
        file.oauth_jwks_url.clone()
    });
    let oauth = match (issuer, audience) {
        (Some(issuer), Some(audience)) => Some(OAuthSettings {
            issuer,
            audience,
            jwks_url,
        }),
        _ => None,
    };
    if transport == Transport::Sse && oauth.is_none() {
        return Err(ConfigError::MissingOAuth);
    }

    let streamable_http_path = path_setting(&layers, "streamableHttpPath", "/mcp", |file| {
        file.streamable_http_path.clone()
    })?;
    let sse_path = path_setting(&layers, "ssePath", "/sse", |file| file.sse_path.clone())?;
    let message_path =
        path_setting(&layers, "messagePath", "/messages", |file| file.message_path.clone())?;

    let cors = if cors_input.present {
        if cors_input.allow_all || cors_input.values.is_empty() {
            CorsConfig::AllowAll
        } else {
            CorsConfig::AllowList {
                raw: cors_input.values,
            }
        }
    } else {
        match layers.file.cors.clone() {
            Some(origins) if origins.iter().any(|origin| origin == "*") => CorsConfig::AllowAll,
            Some(origins) if !origins.is_empty() => CorsConfig::AllowList { raw: origins },
            _ => CorsConfig::Disabled,
        }
    };

    let mut health_endpoints: Vec<String> = matches
        .get_many::<String>("healthEndpoint")
        .map(|values| values.filter(|v| !v.is_empty()).cloned().collect())
        .unwrap_or_default();
    if health_endpoints.is_empty() {
        health_endpoints = layers.file.health_endpoints.clone().unwrap_or_default();
    }

    let log_level = matches
        .get_one::<LogLevel>("logLevel")
        .copied()
        .or(layers.file.log_level)
        .unwrap_or(LogLevel::Info);

    Ok(Config {
        transport,
        fax_api_url,
        api_key,
        host,
        port,
        session_timeout: Duration::from_millis(session_timeout_ms),
        oauth,
        max_body_bytes,
        streamable_http_path,
        sse_path,
        message_path,
        cors,
        health_endpoints,
        log_level,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

fn path_setting<E: Fn(&str) -> Option<String>>(
    layers: &Layers<'_, E>,
    arg: &'static str,
    default: &str,
    file: impl FnOnce(&FileConfig) -> Option<String>,
) -> Result<String, ConfigError> {
    let path = layers
        .string(arg, None, file)
        .unwrap_or_else(|| default.to_string());
    if !path.starts_with('/') {
        return Err(ConfigError::invalid(arg, "a path starting with '/'", path));
    }
    Ok(path)
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::invalid("faxApiUrl", "an http(s) URL", raw)),
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::invalid("port", "in 1..=65535", raw)),
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::invalid(key, "a positive number", raw)),
    }
}

fn build_cli() -> Command {
    Command::new("faxbot-mcp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("MCP gateway exposing send_fax and get_fax_status")
        .arg(
            Arg::new("transport")
                .long("transport")
                .value_parser(clap::builder::EnumValueParser::<Transport>::new())
                .value_name("stdio|streamable-http|sse"),
        )
        .arg(
            Arg::new("faxApiUrl")
                .long("faxApiUrl")
                .alias("fax-api-url")
                .value_name("URL"),
        )
        .arg(
            Arg::new("apiKey")
                .long("apiKey")
                .alias("api-key")
                .value_name("KEY"),
        )
        .arg(Arg::new("host").long("host").value_name("HOST"))
        .arg(Arg::new("port").long("port").value_name("PORT"))
        .arg(
            Arg::new("sessionTimeout")
                .long("sessionTimeout")
                .alias("session-timeout")
                .value_name("MILLISECONDS"),
        )
        .arg(
            Arg::new("oauthIssuer")
                .long("oauthIssuer")
                .alias("oauth-issuer")
                .value_name("URL"),
        )
        .arg(
            Arg::new("oauthAudience")
                .long("oauthAudience")
                .alias("oauth-audience")
                .value_name("AUDIENCE"),
        )
        .arg(
            Arg::new("oauthJwksUrl")
                .long("oauthJwksUrl")
                .alias("oauth-jwks-url")
                .value_name("URL"),
        )
        .arg(
            Arg::new("maxBodyBytes")
                .long("maxBodyBytes")
                .alias("max-body-bytes")
                .value_name("BYTES"),
        )
        .arg(
            Arg::new("streamableHttpPath")
                .long("streamableHttpPath")
                .alias("streamable-http-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("ssePath")
                .long("ssePath")
                .alias("sse-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("messagePath")
                .long("messagePath")
                .alias("message-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("cors")
                .long("cors")
                .num_args(0..=1)
                .action(ArgAction::Append)
                .value_name("ORIGIN"),
        )
        .arg(
            Arg::new("healthEndpoint")
                .long("healthEndpoint")
                .alias("health-endpoint")
                .action(ArgAction::Append)
                .value_name("PATH"),
        )
        .arg(
            Arg::new("logLevel")
                .long("logLevel")
                .alias("log-level")
                .value_parser(clap::builder::EnumValueParser::<LogLevel>::new())
                .value_name("debug|info|none"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE"),
        )
}

#[derive(Default)]
struct CorsInput {
    present: bool,
    allow_all: bool,
    values: Vec<String>,
}

/// `--cors` takes an optional value, which clap cannot tell apart from the
/// next flag; scan the raw arguments instead.
fn parse_cors_flags(args: &[String]) -> CorsInput {
    let mut input = CorsInput::default();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--cors" {
            input.present = true;
            match args.get(i + 1) {
                Some(next) if !next.starts_with("--") => {
                    if next == "*" {
                        input.allow_all = true;
                    } else {
                        input.values.push(next.clone());
                    }
                    i += 1;
                }
                _ => input.allow_all = true,
            }
        }
        i += 1;
    }
    input
}
