use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;

use crate::error_handling::types::ConfigError;

/// Timezone used to render the output path template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    /// The host's local timezone.
    Local,
    /// An IANA timezone such as `Asia/Tokyo` or `UTC`.
    Named(Tz),
}

impl Timezone {
    /// Renders the strftime `pattern` for the instant `t` in this timezone.
    pub fn format(&self, t: DateTime<Utc>, pattern: &str) -> Result<String, fmt::Error> {
        let mut out = String::new();
        match self {
            Timezone::Local => write!(out, "{}", t.with_timezone(&Local).format(pattern))?,
            Timezone::Named(tz) => write!(out, "{}", t.with_timezone(tz).format(pattern))?,
        }
        Ok(out)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Timezone::Local
    }
}

impl FromStr for Timezone {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "Local" {
            return Ok(Timezone::Local);
        }
        s.parse::<Tz>()
            .map(Timezone::Named)
            .map_err(|_| ConfigError::BadTimezone(s.to_string()))
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timezone::Local => write!(f, "Local"),
            Timezone::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// What the stream listener speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    Tcp,
    Tls(TlsFiles),
}

impl ServerMode {
    /// Both files select TLS, neither selects plain TCP, one alone is an error.
    pub fn from_tls_files(
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(ServerMode::Tls(TlsFiles { cert, key })),
            (None, None) => Ok(ServerMode::Tcp),
            (Some(_), None) => Err(ConfigError::IncompleteTlsPair(
                "a TLS certificate was given without a key; both are required for TLS, neither for TCP"
                    .to_string(),
            )),
            (None, Some(_)) => Err(ConfigError::IncompleteTlsPair(
                "a TLS key was given without a certificate; both are required for TLS, neither for TCP"
                    .to_string(),
            )),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Tcp => write!(f, "TCP"),
            ServerMode::Tls(_) => write!(f, "TLS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_local_and_iana_names() {
        assert_eq!("Local".parse::<Timezone>().unwrap(), Timezone::Local);
        assert_eq!(
            "Asia/Tokyo".parse::<Timezone>().unwrap(),
            Timezone::Named(chrono_tz::Asia::Tokyo)
        );
        assert!(matches!(
            "Mars/Olympus_Mons".parse::<Timezone>(),
            Err(ConfigError::BadTimezone(_))
        ));
    }

    #[test]
    fn formats_in_the_selected_zone() {
        let t = Utc.with_ymd_and_hms(2026, 10, 19, 23, 30, 5).unwrap();
        let tokyo = Timezone::Named(chrono_tz::Asia::Tokyo);
        let utc = Timezone::Named(chrono_tz::UTC);
        assert_eq!(tokyo.format(t, "%Y%m%d/%H%M%S").unwrap(), "20261020/083005");
        assert_eq!(utc.format(t, "%Y-%m-%d_%H").unwrap(), "2026-10-19_23");
    }

    #[test]
    fn tls_files_must_come_in_pairs() {
        assert_eq!(ServerMode::from_tls_files(None, None).unwrap(), ServerMode::Tcp);
        assert!(matches!(
            ServerMode::from_tls_files(Some("c.pem".into()), Some("k.pem".into())),
            Ok(ServerMode::Tls(_))
        ));
        assert!(matches!(
            ServerMode::from_tls_files(Some("c.pem".into()), None),
            Err(ConfigError::IncompleteTlsPair(_))
        ));
        assert!(matches!(
            ServerMode::from_tls_files(None, Some("k.pem".into())),
            Err(ConfigError::IncompleteTlsPair(_))
        ));
    }
}
