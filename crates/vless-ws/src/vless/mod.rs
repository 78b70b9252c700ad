//! The VLESS request/response codec.
//!
//! VLESS is a stateless, UUID-authenticated proxy protocol: the client's
//! first message carries a versioned binary header naming the user and the
//! destination, the server answers with a two-byte acknowledgement, and
//! everything after that is raw payload.

use thiserror::Error;

mod uuid;
pub use uuid::Uuid;

pub mod protocol;
pub use protocol::{Address, RequestCommand, RequestHeader};

mod encoding;
pub use encoding::{decode_request_header, encode_request_header, encode_response_header};

/// Why a client's first message was not a usable VLESS request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A header field would read past the end of the message.
    #[error("request header truncated")]
    ShortHeader,

    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddrType(u8),

    /// Empty domain, or a domain containing non-printable bytes.
    #[error("invalid domain name")]
    InvalidDomain,

    /// A user id string that is not a canonical UUID.
    #[error("invalid user id")]
    InvalidUserId,
}
