use std::{collections::HashMap, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Result;
use clap::Parser;
use codec::auth::AuthenticationScheme;
use serde::{Deserialize, Serialize};
use service::ListenerPrefix;

/// SSL configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Ssl {
    ///
    /// SSL private key file
    ///
    pub private_key: String,
    ///
    /// SSL certificate chain file
    ///
    pub certificate_chain: String,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Authentication {
    #[default]
    None,
    Basic,
    Digest,
}

impl Authentication {
    pub fn as_scheme(&self) -> AuthenticationScheme {
        match self {
            Self::None => AuthenticationScheme::Anonymous,
            Self::Basic => AuthenticationScheme::Basic,
            Self::Digest => AuthenticationScheme::Digest,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// listener prefixes
    ///
    /// `http[s]://host[:port]/path/`, where the host is `*` or `+` to
    /// listen on every interface, `localhost`, or an IP address.
    ///
    #[serde(default = "Server::prefixes")]
    pub prefixes: Vec<ListenerPrefix>,
    ///
    /// certificate folder
    ///
    /// A secure prefix on port N looks for `N.cer` and `N.key` in this
    /// folder before falling back to `ssl`.
    ///
    #[serde(default)]
    pub certificate_folder: Option<PathBuf>,
    #[serde(default)]
    pub ssl: Option<Ssl>,
    #[serde(default)]
    pub reuse_address: bool,
    ///
    /// authentication realm
    ///
    #[serde(default = "Server::realm")]
    pub realm: String,
    #[serde(default)]
    pub authentication: Authentication,
    ///
    /// Idle timeout in seconds of a new connection.
    ///
    #[serde(default = "Server::first_request_timeout")]
    pub first_request_timeout: u64,
    ///
    /// Idle timeout in seconds between keep-alive requests.
    ///
    #[serde(default = "Server::reuse_timeout")]
    pub reuse_timeout: u64,
}

impl Server {
    fn prefixes() -> Vec<ListenerPrefix> {
        ListenerPrefix::parse("http://*:8080/").into_iter().collect()
    }

    fn realm() -> String {
        "SECRET AREA".to_string()
    }

    fn first_request_timeout() -> u64 {
        90
    }

    fn reuse_timeout() -> u64 {
        15
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            prefixes: Self::prefixes(),
            certificate_folder: None,
            ssl: None,
            reuse_address: false,
            realm: Self::realm(),
            authentication: Authentication::default(),
            first_request_timeout: Self::first_request_timeout(),
            reuse_timeout: Self::reuse_timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct WebSocket {
    ///
    /// Seconds to wait for a pong or for the peer's close frame.
    ///
    #[serde(default = "WebSocket::wait_time")]
    pub wait_time: u64,
    ///
    /// Periodically drop sessions that stopped answering pings.
    ///
    #[serde(default = "WebSocket::keep_clean")]
    pub keep_clean: bool,
    ///
    /// Paths served by the echo service.
    ///
    #[serde(default = "WebSocket::services")]
    pub services: Vec<String>,
    #[serde(default)]
    pub emit_on_ping: bool,
    #[serde(default)]
    pub ignore_extensions: bool,
    ///
    /// Subprotocol selected when a client offers it.
    ///
    #[serde(default)]
    pub protocol: Option<String>,
}

impl WebSocket {
    fn wait_time() -> u64 {
        1
    }

    fn keep_clean() -> bool {
        true
    }

    fn services() -> Vec<String> {
        vec!["/echo".to_string()]
    }
}

impl Default for WebSocket {
    fn default() -> Self {
        Self {
            wait_time: Self::wait_time(),
            keep_clean: Self::keep_clean(),
            services: Self::services(),
            emit_on_ping: false,
            ignore_extensions: false,
            protocol: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// static user password
    ///
    /// Users allowed in when authentication is enabled.
    ///
    #[serde(default)]
    pub static_credentials: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub websocket: WebSocket,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub auth: Auth,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: wshost --config /etc/wshost/config.json5
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// When no configuration file is given, the default configuration is
    /// used.
    ///
    pub fn load() -> Result<Self> {
        match Cli::parse().config {
            Some(path) => Self::from_json5(&read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }

    pub fn from_json5(value: &str) -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(value)?)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.websocket.wait_time)
    }
}
