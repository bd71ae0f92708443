use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use super::types::{ServerMode, Timezone};
use crate::error_handling::types::ConfigError;
use crate::storage::{PathTemplate, RotationPolicy};

/// Command-line arguments.
///
/// Every value can also be given in the `[capture]` table of the file passed
/// with `--config`; values from the file take precedence.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "redcap",
    version,
    about = "Transparent TCP/TLS/UDP traffic capture",
    disable_version_flag = true
)]
pub struct CliArgs {
    /// IP address to listen on
    #[arg(short = 'H', long, env = "REDCAP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on, for both TCP (or TLS) and UDP
    #[arg(short, long, env = "REDCAP_PORT", default_value_t = 12345)]
    pub port: u16,

    /// Idle timeout of TCP/TLS sessions, in seconds
    #[arg(short, long, default_value_t = 60)]
    pub timeout: u64,

    /// Output path template with strftime placeholders, e.g.
    /// `/var/lib/redcap/%Y%m%d/%H%M.jsonl`. Empty disables persistence
    #[arg(short = 'w', long, env = "REDCAP_OUTPUT", default_value = "")]
    pub output: String,

    /// Rotation interval in seconds; 0 disables rotation
    #[arg(short = 'T', long, default_value_t = 0)]
    pub rotation_interval: u64,

    /// Rotation offset in seconds, smaller than the rotation interval
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Timezone used to render the output template: `Local` or an IANA name
    #[arg(short = 'z', long, default_value = "Local")]
    pub timezone: String,

    /// Raise the open files limit to this value; 0 keeps the current limit
    #[arg(short = 'R', long, default_value_t = 0)]
    pub max_fd: u64,

    /// PEM certificate chain; together with --key switches TCP to TLS
    #[arg(short = 'C', long)]
    pub cert: Option<PathBuf>,

    /// PEM private key; together with --cert switches TCP to TLS
    #[arg(short = 'K', long)]
    pub key: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Do not start the TCP/TLS listener
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_tcp_server: bool,

    /// Do not start the UDP listener
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub disable_udp_server: bool,

    /// Seconds to wait for open sessions on shutdown
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    pub version: (),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    capture: Option<CaptureSection>,
}

/// `[capture]` table of the configuration file. Keys are the long flag names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct CaptureSection {
    host: Option<String>,
    port: Option<u16>,
    timeout: Option<u64>,
    output: Option<String>,
    rotation_interval: Option<u64>,
    offset: Option<u64>,
    timezone: Option<String>,
    max_fd: Option<u64>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    disable_tcp_server: Option<bool>,
    disable_udp_server: Option<bool>,
    shutdown_grace: Option<u64>,
}

impl CliArgs {
    /// Applies the values of the `[capture]` table of `path` on top of `self`.
    fn merge_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let file: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        let Some(section) = file.capture else {
            return Ok(self);
        };

        if let Some(v) = section.host {
            self.host = v;
        }
        if let Some(v) = section.port {
            self.port = v;
        }
        if let Some(v) = section.timeout {
            self.timeout = v;
        }
        if let Some(v) = section.output {
            self.output = v;
        }
        if let Some(v) = section.rotation_interval {
            self.rotation_interval = v;
        }
        if let Some(v) = section.offset {
            self.offset = v;
        }
        if let Some(v) = section.timezone {
            self.timezone = v;
        }
        if let Some(v) = section.max_fd {
            self.max_fd = v;
        }
        if section.cert.is_some() {
            self.cert = section.cert;
        }
        if section.key.is_some() {
            self.key = section.key;
        }
        if let Some(v) = section.disable_tcp_server {
            self.disable_tcp_server = v;
        }
        if let Some(v) = section.disable_udp_server {
            self.disable_udp_server = v;
        }
        if let Some(v) = section.shutdown_grace {
            self.shutdown_grace = v;
        }
        Ok(self)
    }
}

/// Where and how sessions are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub template: PathTemplate,
    pub rotation: RotationPolicy,
}

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub idle_timeout: Duration,
    pub mode: ServerMode,
    /// `None` when persistence is disabled.
    pub output: Option<OutputConfig>,
    pub tcp_enabled: bool,
    pub udp_enabled: bool,
    /// Requested `RLIMIT_NOFILE`; 0 keeps the inherited limit.
    pub max_fd: u64,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Parses the process arguments, reads the configuration file if one is
    /// given and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let args = match args.config.clone() {
            Some(path) => args.merge_file(&path)?,
            None => args,
        };
        Self::validate(args)
    }

    fn validate(args: CliArgs) -> Result<Self, ConfigError> {
        let ip: IpAddr = args
            .host
            .parse()
            .map_err(|_| ConfigError::BadIPFormatting(args.host.clone()))?;

        if args.timeout == 0 {
            return Err(ConfigError::NotInRange(
                "timeout must be at least one second".to_string(),
            ));
        }

        let rotation = RotationPolicy::new(args.rotation_interval, args.offset)?;
        let timezone: Timezone = args.timezone.parse()?;
        let output = if args.output.is_empty() {
            None
        } else {
            Some(OutputConfig {
                template: PathTemplate::new(args.output, timezone)?,
                rotation,
            })
        };

        let mode = ServerMode::from_tls_files(args.cert, args.key)?;

        if args.disable_tcp_server && args.disable_udp_server {
            return Err(ConfigError::Conflict(
                "both the TCP and the UDP server are disabled".to_string(),
            ));
        }

        Ok(Self {
            listen_addr: SocketAddr::new(ip, args.port),
            idle_timeout: Duration::from_secs(args.timeout),
            mode,
            output,
            tcp_enabled: !args.disable_tcp_server,
            udp_enabled: !args.disable_udp_server,
            max_fd: args.max_fd,
            shutdown_grace: Duration::from_secs(args.shutdown_grace),
        })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listen={} mode={} timeout={}s tcp={} udp={}",
            self.listen_addr,
            self.mode,
            self.idle_timeout.as_secs(),
            self.tcp_enabled,
            self.udp_enabled
        )?;
        match &self.output {
            Some(output) => write!(
                f,
                " output={} timezone={} rotation={}s offset={}s",
                output.template.as_str(),
                output.template.timezone(),
                output.rotation.interval_secs(),
                output.rotation.offset_secs()
            ),
            None => write!(f, " output=<disabled>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let mut argv = vec!["redcap"];
        argv.extend_from_slice(args);
        let args = CliArgs::try_parse_from(argv).unwrap_or_else(|e| panic!("{}", e));
        Config::from_args(args)
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:12345".parse().unwrap());
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.mode, ServerMode::Tcp);
        assert!(config.output.is_none());
        assert!(config.tcp_enabled);
        assert!(config.udp_enabled);
        assert_eq!(config.max_fd, 0);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn short_flags() {
        let config = parse(&[
            "-H", "127.0.0.1", "-p", "8443", "-t", "5", "-w", "out/%Y%m%d.jsonl", "-T", "3600",
            "--offset", "60", "-z", "Asia/Tokyo", "-R", "65536",
        ])
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_fd, 65536);
        let output = config.output.unwrap();
        assert_eq!(output.template.as_str(), "out/%Y%m%d.jsonl");
        assert_eq!(
            output.template.timezone(),
            Timezone::Named(chrono_tz::Asia::Tokyo)
        );
        assert_eq!(output.rotation, RotationPolicy::new(3600, 60).unwrap());
    }

    #[test]
    #[serial]
    fn environment_fills_in_missing_flags() {
        std::env::set_var("REDCAP_PORT", "2323");
        let config = parse(&[]);
        std::env::remove_var("REDCAP_PORT");
        assert_eq!(config.unwrap().listen_addr.port(), 2323);
    }

    #[test]
    #[serial]
    fn file_values_override_flags() {
        let file = toml_file(
            r#"
[capture]
port = 9000
output = "/tmp/redcap/%H.jsonl"
rotation-interval = 60
disable-udp-server = true
"#,
        );
        let path = file.path().to_str().unwrap();
        let config = parse(&["-p", "1", "-t", "7", "-c", path]).unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.idle_timeout, Duration::from_secs(7));
        assert!(!config.udp_enabled);
        assert_eq!(
            config.output.unwrap().rotation,
            RotationPolicy::new(60, 0).unwrap()
        );
    }

    #[test]
    #[serial]
    fn file_without_capture_table_changes_nothing() {
        let file = toml_file("");
        let path = file.path().to_str().unwrap();
        assert_eq!(parse(&["-c", path]).unwrap(), parse(&[]).unwrap());
    }

    #[test]
    #[serial]
    fn bad_files_are_rejected() {
        let unknown = toml_file("[capture]\nlisten = \"0.0.0.0\"\n");
        assert!(matches!(
            parse(&["-c", unknown.path().to_str().unwrap()]),
            Err(ConfigError::TomlError(_))
        ));
        let broken = toml_file("[capture\nport = 1");
        assert!(matches!(
            parse(&["-c", broken.path().to_str().unwrap()]),
            Err(ConfigError::TomlError(_))
        ));
        assert!(matches!(
            parse(&["-c", "/nonexistent/redcap.toml"]),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    #[serial]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            parse(&["-H", "not-an-ip"]),
            Err(ConfigError::BadIPFormatting(_))
        ));
        assert!(matches!(
            parse(&["-t", "0"]),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(matches!(
            parse(&["-T", "60", "--offset", "60"]),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(matches!(
            parse(&["-z", "Nowhere/Special"]),
            Err(ConfigError::BadTimezone(_))
        ));
        assert!(matches!(
            parse(&["-w", "out/%J.jsonl"]),
            Err(ConfigError::BadTemplate(_))
        ));
        assert!(matches!(
            parse(&["-C", "cert.pem"]),
            Err(ConfigError::IncompleteTlsPair(_))
        ));
        assert!(matches!(
            parse(&["--disable-tcp-server", "--disable-udp-server"]),
            Err(ConfigError::Conflict(_))
        ));
    }

    #[test]
    #[serial]
    fn lowercase_v_prints_the_version() {
        for flag in ["-v", "--version"] {
            let err = CliArgs::try_parse_from(["redcap", flag]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        }
        assert!(CliArgs::try_parse_from(["redcap", "-V"]).is_err());
    }

    #[test]
    #[serial]
    fn cert_and_key_select_tls() {
        let config = parse(&["-C", "cert.pem", "-K", "key.pem"]).unwrap();
        assert!(matches!(config.mode, ServerMode::Tls(_)));
    }
}
