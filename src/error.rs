use crate::{api::ProtocolError, dns};
use openssl::error::ErrorStack;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// Failed to generate or load key material, or to build a CSR
    Crypto(ErrorStack),
    /// A CSR was requested without any domains
    MissingIdentifiers,
    /// A persisted account was not valid JSON or did not have the expected shape
    Deserialization(serde_json::Error),
    /// A persisted account key is missing or has a malformed parameter
    InvalidAccountKey(&'static str),
    /// The account could not be serialized
    Serialization(serde_json::Error),
    /// The ACME server rejected a request or could not be reached
    Protocol(ProtocolError),
    /// None of the order's authorizations offered a DNS-01 challenge
    ChallengeUnavailable { domain: String },
    /// The challenge record did not propagate before the polling budget ran out
    PropagationTimeout {
        record: String,
        change_id: String,
        status: String,
        attempts: usize,
    },
    /// The DNS controller failed for a reason other than propagation
    Dns(Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// Whether the error was caused by a malformed persisted account
    pub fn is_deserialization(&self) -> bool {
        matches!(self, Self::Deserialization(_) | Self::InvalidAccountKey(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto(_) => write!(f, "a cryptographic operation failed"),
            Self::MissingIdentifiers => write!(f, "at least one domain is required"),
            Self::Deserialization(_) => write!(f, "failed to deserialize the account"),
            Self::InvalidAccountKey(reason) => {
                write!(f, "the persisted account key is invalid: {reason}")
            }
            Self::Serialization(_) => write!(f, "failed to serialize the account"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::ChallengeUnavailable { domain } => {
                write!(f, "no dns-01 challenge was offered for {domain}")
            }
            Self::PropagationTimeout {
                record,
                change_id,
                status,
                attempts,
            } => write!(
                f,
                "change {change_id} for {record} was still {status} after {attempts} checks"
            ),
            Self::Dns(_) => write!(f, "the dns controller failed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            Self::Deserialization(e) | Self::Serialization(e) => Some(e),
            Self::Protocol(e) => e.source(),
            Self::Dns(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ErrorStack> for Error {
    fn from(err: ErrorStack) -> Self {
        Self::Crypto(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<dns::Error> for Error {
    fn from(err: dns::Error) -> Self {
        match err {
            dns::Error::PropagationTimeout {
                record,
                change_id,
                status,
                attempts,
            } => Self::PropagationTimeout {
                record,
                change_id,
                status,
                attempts,
            },
            dns::Error::Provider(e) => Self::Dns(e),
        }
    }
}
