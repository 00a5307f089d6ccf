//! Error taxonomy for the agent. Each layer gets its own `thiserror` enum;
//! the kinds line up with the error-kind vocabulary used to drive backoff,
//! retry and CLI exit behavior.
use thiserror::Error;

/// High level classification used by the poller and result processor to
/// decide how to react to a failure, independent of which layer produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unreachable,
    Unauthenticated,
    RotationRequired,
    UnsupportedDriver,
    VerificationTimeout,
    Validation,
    TransientIo,
    FatalConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid OLT id `{0}`: allowed characters are a-zA-Z0-9_-")]
    InvalidOltId(String),
    #[error("invalid node id `{0}`: allowed characters are a-zA-Z0-9_-")]
    InvalidNodeId(String),
    #[error("OLT `{0}` has polling enabled but no protocol enabled")]
    NoProtocolEnabled(String),
    #[error("OLT `{0}` has interval_seconds == 0, must be >= 1")]
    IntervalTooSmall(String),
    #[error("OLT `{0}` names `{1}` as primary protocol but it is not enabled")]
    PrimaryNotEnabled(String, String),
    #[error("io error loading persisted state: `{0}`")]
    Io(#[from] std::io::Error),
    #[error("malformed persisted state: `{0}`")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("OLT `{0}` not found in registry")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("control plane unreachable: `{0}`")]
    Unreachable(String),
    #[error("request rejected: not authenticated")]
    Unauthenticated,
    #[error("server requires key rotation")]
    RotationRequired,
    #[error("no authentication method is configured")]
    NoAuthConfigured,
    #[error("transport error: `{0}`")]
    Transport(#[from] Box<ureq::Error>),
    #[error("malformed response body: `{0}`")]
    Body(#[from] std::io::Error),
    #[error("malformed json: `{0}`")]
    Json(#[from] serde_json::Error),
}

impl ControlPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::Unreachable(_)
            | ControlPlaneError::Transport(_)
            | ControlPlaneError::Body(_)
            | ControlPlaneError::Json(_) => ErrorKind::Unreachable,
            ControlPlaneError::Unauthenticated | ControlPlaneError::NoAuthConfigured => {
                ErrorKind::Unauthenticated
            }
            ControlPlaneError::RotationRequired => ErrorKind::RotationRequired,
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("driver does not support the requested capability")]
    UnsupportedDriver,
    #[error("connect timed out after `{0:?}`")]
    ConnectTimeout(std::time::Duration),
    #[error("transient I/O error: `{0}`")]
    TransientIo(String),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::UnsupportedDriver => ErrorKind::UnsupportedDriver,
            PollError::ConnectTimeout(_) | PollError::TransientIo(_) => ErrorKind::TransientIo,
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("change not reflected after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("predicate error: `{0}`")]
    Predicate(String),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(
        "profile `{profile}` implies VLAN {parsed} but request asked for VLAN {requested}; \
         resolve by: (1) pass --force to apply the VLAN directly and clear the profile, \
         (2) use a profile name matching vlan_{requested}, or (3) drop the explicit --vlan flag"
    )]
    ProfileVlanMismatch {
        profile: String,
        parsed: u16,
        requested: u16,
    },
    #[error("vlan {0} is out of range 1..4094")]
    VlanOutOfRange(u16),
    #[error("missing required identifier: `{0}`")]
    MissingIdentifier(&'static str),
    #[error("malformed serial `{0}`")]
    MalformedSerial(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("fatal configuration error: `{0}`")]
    FatalConfig(String),
    #[error("config error: `{0}`")]
    Config(#[from] ConfigError),
    #[error("control plane error: `{0}`")]
    ControlPlane(#[from] ControlPlaneError),
    #[error("could not install signal handler: `{0}`")]
    Signal(#[from] ctrlc::Error),
}
