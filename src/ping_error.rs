use std::time::Duration;
use std::{error::Error, fmt, io};

pub type PingResult<T> = std::result::Result<T, PingError>;

#[derive(Debug)]
pub enum PingError {
    /// The requested send interval is below the flood-protection floor.
    InvalidInterval { requested: Duration, minimum: Duration },
    /// A received datagram does not match the expected IPv4+ICMP layout.
    ProtocolViolation { message: String },
    /// The underlying socket failed or timed out.
    Transport(io::Error),
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            PingError::InvalidInterval { requested, minimum } => {
                write!(
                    f,
                    "cannot flood; minimal interval allowed is {}ms (requested {}ms)",
                    minimum.as_millis(),
                    requested.as_millis()
                )
            }
            PingError::ProtocolViolation { message } => {
                write!(f, "protocol violation: {message}")
            }
            PingError::Transport(error) => write!(f, "transport error: {error}"),
        }
    }
}

impl Error for PingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PingError::Transport(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for PingError {
    fn from(error: io::Error) -> PingError {
        PingError::Transport(error)
    }
}
