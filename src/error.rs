//! The crate-wide error type and the categories of §7's error taxonomy.

use std::fmt;

use crate::PeerId;

/// A specialized `Result` type using the crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All failure categories the engine can produce.
///
/// Config and bind failures are fatal at startup; connect failures are
/// logged and abandoned; frame and disconnect failures tear down a single
/// session; disk IO failures are logged and the piece is treated as not
/// acquired.
#[derive(Debug)]
pub enum Error {
    /// `Common.cfg` or `PeerInfo.cfg` is missing, malformed, or the local
    /// peer id isn't listed in the peer directory.
    Config(String),
    /// Could not bind the listening socket.
    Bind(std::io::Error),
    /// Could not connect to a peer listed earlier in the peer directory.
    Connect { remote: PeerId, source: std::io::Error },
    /// A handshake or typed message frame was invalid.
    MalformedFrame(String),
    /// The remote peer closed the connection cleanly.
    PeerDisconnect,
    /// The file store could not complete a read or write.
    Io(std::io::Error),
    /// A piece index was out of bounds for the torrent's piece count.
    InvalidPieceIndex(crate::PieceIndex),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Bind(e) => write!(f, "failed to bind listening socket: {}", e),
            Error::Connect { remote, source } => {
                write!(f, "failed to connect to peer {}: {}", remote, source)
            }
            Error::MalformedFrame(msg) => write!(f, "malformed frame: {}", msg),
            Error::PeerDisconnect => write!(f, "peer disconnected"),
            Error::Io(e) => write!(f, "file store io error: {}", e),
            Error::InvalidPieceIndex(index) => {
                write!(f, "invalid piece index: {}", index)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(e) | Error::Io(e) => Some(e),
            Error::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let e = Error::Connect {
            remote: 1002,
            source: std::io::Error::new(std::io::ErrorKind::Other, "refused"),
        };
        let msg = e.to_string();
        assert!(msg.contains("1002"));
        assert!(msg.contains("refused"));
    }
}
