/// Shared error type used across the fleet crates, mirroring the error
/// kinds the orchestration protocol distinguishes (session layer,
/// controller, agent, apply engine).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed frame, unknown response cid, unexpected binary frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer replied `false` to a request.
    #[error("remote command failed: {0}")]
    Command(String),

    /// Missing/invalid certificate, non-admin uid, duplicate CN takeover.
    #[error("auth error: {0}")]
    Auth(String),

    /// Syntax or evaluation error in a policy or tags program. The message
    /// is pre-formatted as `<path>:<line>: <detail>`.
    #[error("{0}")]
    PolicyLoad(String),

    /// A decree's detect/update/activate phase failed.
    #[error("decree error: {0}")]
    Decree(String),

    /// Connection drop, TLS failure, handshake failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn policy_load(path: &str, line: u32, message: impl std::fmt::Display) -> Self {
        Error::PolicyLoad(format!("{path}:{line}: {message}"))
    }
}
