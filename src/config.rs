// Service configuration. Every field has a default so a bare `screencast`
// invocation serves the primary display over plaintext on 0.0.0.0:8443.

use crate::capture::MonitorRegion;
use crate::error::ConfigError;
use crate::peer::types::IceServerConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8443";
pub const DEFAULT_REGION: &str = "0,0,1280x720";
pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const MAX_FRAME_RATE: u32 = 120;
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];
pub const DEFAULT_LOG_FILTER: &str = "screencast=info,screencast_lib=info,webrtc=warn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// What each session captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub region: MonitorRegion,
    pub frame_rate_hz: u32,
    /// X display to capture from; `None` uses `$DISPLAY`.
    pub display: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            region: MonitorRegion::new(0, 0, 1280, 720),
            frame_rate_hz: DEFAULT_FRAME_RATE,
            display: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub bind: SocketAddr,
    pub tls: Option<TlsConfig>,
    pub stream: StreamConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub negotiation_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Directory holding the browser client (`index.html`, `client.js`).
    pub static_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([0, 0, 0, 0], 8443)),
            tls: None,
            stream: StreamConfig::default(),
            ice_servers: default_ice_servers(),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            static_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let region = &self.stream.region;
        if region.width == 0 || region.height == 0 {
            return Err(ConfigError(format!("capture region {region} is empty")));
        }
        // 4:2:0 chroma subsampling needs even dimensions
        if region.width % 2 != 0 || region.height % 2 != 0 {
            return Err(ConfigError(format!(
                "capture region {region} must have even width and height"
            )));
        }
        if self.stream.frame_rate_hz == 0 || self.stream.frame_rate_hz > MAX_FRAME_RATE {
            return Err(ConfigError(format!(
                "frame rate must be between 1 and {MAX_FRAME_RATE} Hz, got {}",
                self.stream.frame_rate_hz
            )));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(ConfigError("negotiation timeout must be positive".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError(format!("ICE server '{}' has an empty URL", server.id)));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(ConfigError(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    DEFAULT_STUN_SERVERS
        .iter()
        .enumerate()
        .map(|(i, url)| IceServerConfig::from_url(format!("default-stun-{i}"), *url))
        .collect()
}

/// Command line of the `screencast` binary.
#[derive(Debug, Parser)]
#[command(name = "screencast", version, about)]
pub struct Args {
    /// Address the signaling server listens on
    #[arg(long, env = "SCREENCAST_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, env = "SCREENCAST_CERT", requires = "key")]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "SCREENCAST_KEY", requires = "cert")]
    pub key: Option<PathBuf>,

    /// Captured area as `left,top,WIDTHxHEIGHT`
    #[arg(long, env = "SCREENCAST_REGION", default_value = DEFAULT_REGION)]
    pub region: MonitorRegion,

    /// Frames per second produced for every session
    #[arg(long, env = "SCREENCAST_FPS", default_value_t = DEFAULT_FRAME_RATE)]
    pub fps: u32,

    /// X display to capture (defaults to $DISPLAY)
    #[arg(long)]
    pub display: Option<String>,

    /// STUN/TURN server URL, repeatable
    #[arg(long = "ice-server", env = "SCREENCAST_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,

    /// Username for every TURN server
    #[arg(long, env = "SCREENCAST_TURN_USERNAME")]
    pub turn_username: Option<String>,

    /// Credential for every TURN server
    #[arg(long, env = "SCREENCAST_TURN_CREDENTIAL")]
    pub turn_credential: Option<String>,

    /// Seconds allowed for one offer/answer negotiation
    #[arg(long, default_value_t = DEFAULT_NEGOTIATION_TIMEOUT.as_secs())]
    pub negotiation_timeout: u64,

    /// Seconds in-flight HTTP requests get to finish at shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE.as_secs())]
    pub shutdown_grace: u64,

    /// Serve the browser client from this directory
    #[arg(long, env = "SCREENCAST_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// tracing filter directives
    #[arg(long = "log", env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let tls = match (self.cert, self.key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            (None, None) => None,
            _ => return Err(ConfigError("--cert and --key must be given together".into())),
        };

        let ice_servers = if self.ice_servers.is_empty() {
            default_ice_servers()
        } else {
            self.ice_servers
                .iter()
                .enumerate()
                .map(|(i, url)| {
                    let mut server = IceServerConfig::from_url(format!("ice-{i}"), url.trim());
                    if server.is_turn() {
                        server.username = self.turn_username.clone();
                        server.credential = self.turn_credential.clone();
                    }
                    server
                })
                .collect()
        };

        let config = Config {
            bind: self.bind,
            tls,
            stream: StreamConfig {
                region: self.region,
                frame_rate_hz: self.fps,
                display: self.display,
            },
            ice_servers,
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            static_dir: self.static_dir,
            log_filter: self.log_filter,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let mut argv = vec!["screencast"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).expect("arguments parse").into_config()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.frame_rate_hz, 30);
        assert_eq!(config.stream.region, MonitorRegion::new(0, 0, 1280, 720));
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn cli_overrides() {
        let config = parse(&[
            "--bind",
            "127.0.0.1:9000",
            "--region",
            "100,50,640x480",
            "--fps",
            "15",
            "--ice-server",
            "turn:relay.example.org:3478",
            "--turn-username",
            "u",
            "--turn-credential",
            "p",
        ])
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.stream.region, MonitorRegion::new(100, 50, 640, 480));
        assert_eq!(config.stream.frame_rate_hz, 15);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert!(config.tls.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--fps", "0"]).is_err());
        assert!(parse(&["--region", "0,0,641x480"]).is_err());
        assert!(parse(&["--ice-server", "turn:relay.example.org:3478"]).is_err());
    }

    #[test]
    fn tls_needs_both_paths() {
        assert!(Args::try_parse_from(["screencast", "--cert", "server.crt"]).is_err());
        let config = parse(&["--cert", "server.crt", "--key", "server.key"]).unwrap();
        assert_eq!(
            config.tls,
            Some(TlsConfig {
                cert_path: "server.crt".into(),
                key_path: "server.key".into(),
            })
        );
    }
}
