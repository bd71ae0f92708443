use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    NotInRange(String),
    BadTimezone(String),
    BadTemplate(String),
    IncompleteTlsPair(String),
    TlsCredentials(String),
    Conflict(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::BadTimezone(e) => write!(f, "Unknown timezone: {}", e),
            ConfigError::BadTemplate(e) => write!(f, "Invalid output path template: {}", e),
            ConfigError::IncompleteTlsPair(e) => write!(f, "Incomplete TLS configuration: {}", e),
            ConfigError::TlsCredentials(e) => write!(f, "TLS credentials error: {}", e),
            ConfigError::Conflict(e) => write!(f, "Conflicting configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    SockError(std::io::Error),
    SockOptError(&'static str, std::io::Error),
    BindError(std::io::Error),
    AcceptFailed(std::io::Error),
    Unsupported(&'static str),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
            NetworkError::SockOptError(opt, e) => {
                write!(f, "Failed to set socket option ({}): {}", opt, e)
            }
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::AcceptFailed(e) => write!(f, "Failed to accept a new connection: {}", e),
            NetworkError::Unsupported(what) => write!(f, "Not supported on this platform: {}", what),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Reasons the pre-redirection destination could not be recovered.
#[derive(Debug)]
pub enum ResolveError {
    Unsupported,
    SockOptFailed(std::io::Error),
    MalformedControl(String),
    UnsupportedFamily(u16),
    Missing,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Unsupported => {
                write!(f, "original destination lookup is only supported on Linux")
            }
            ResolveError::SockOptFailed(e) => write!(f, "SO_ORIGINAL_DST failed: {}", e),
            ResolveError::MalformedControl(e) => write!(f, "malformed control data: {}", e),
            ResolveError::UnsupportedFamily(family) => {
                write!(f, "unsupported address family: {}", family)
            }
            ResolveError::Missing => write!(f, "no original destination in control data"),
        }
    }
}

impl std::error::Error for ResolveError {}

#[derive(Debug)]
pub enum StorageError {
    CreateDirFailed(String, std::io::Error),
    OpenFailed(String, std::io::Error),
    WriteFailed(std::io::Error),
    TemplateFailed(String),
    Closed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::CreateDirFailed(dir, e) => {
                write!(f, "Failed to create directories: {} ({})", dir, e)
            }
            StorageError::OpenFailed(path, e) => {
                write!(f, "Failed to create a session file: {} ({})", path, e)
            }
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::TemplateFailed(t) => write!(f, "Failed to render template: {}", t),
            StorageError::Closed => write!(f, "Storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum CaptureError {
    HandshakeError(std::io::Error),
    SerializationError(serde_json::Error),
    StorageError(StorageError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::HandshakeError(e) => write!(f, "TLS handshake error: {}", e),
            CaptureError::SerializationError(e) => {
                write!(f, "Failed to encode data as json: {}", e)
            }
            CaptureError::StorageError(e) => write!(f, "Capture storage error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    InitializationFailed(String),
    TaskFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
            ControllerError::TaskFailed(e) => write!(f, "Task failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}
