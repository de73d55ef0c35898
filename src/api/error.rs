use super::responses::{self, AccountStatus, ErrorType};
use openssl::error::ErrorStack;
use reqwest::header::ToStrError;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

/// An error that occurred while talking to the ACME server
#[derive(Debug)]
pub enum ProtocolError {
    /// The server answered with a problem document
    Server(responses::Error),
    /// Error occurred while processing the request
    Reqwest(reqwest::Error),
    /// Failed serializing the request or deserializing the response
    Serialization(serde_json::Error),
    /// Failed to generate the JSON Web Signature for the request
    Crypto(ErrorStack),
    /// A required header was missing from the response
    MissingHeader(&'static str),
    /// The header contained invalid data
    InvalidHeader(&'static str, ToStrError),
    /// The account exists but cannot be used
    InvalidAccount(AccountStatus),
    /// The order transitioned to the `invalid` state
    OrderInvalid(Option<responses::Error>),
    /// The order was valid but did not reference a certificate
    MissingCertificate,
    /// A resource did not reach the expected state in time
    MaxAttemptsExceeded,
    /// The CSR could not be parsed or names no DNS identifiers
    InvalidCsr(String),
}

impl ProtocolError {
    /// The problem type reported by the server, if any
    pub fn problem_type(&self) -> Option<&ErrorType> {
        match self {
            Self::Server(problem) => Some(&problem.type_),
            Self::OrderInvalid(Some(problem)) => Some(&problem.type_),
            _ => None,
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(problem) => match &problem.detail {
                Some(detail) => write!(f, "the server rejected the request: {detail}"),
                None => write!(
                    f,
                    "the server rejected the request: {}",
                    problem.type_.description()
                ),
            },
            Self::Reqwest(_) => write!(f, "an error occurred while processing the request"),
            Self::Serialization(_) => write!(f, "failed to (de)serialize an acme message"),
            Self::Crypto(_) => write!(f, "failed to generate json web signature for request"),
            Self::MissingHeader(name) => write!(f, "the `{name}` header was missing"),
            Self::InvalidHeader(name, _) => {
                write!(f, "the value of the `{name}` header was invalid")
            }
            Self::InvalidAccount(status) => {
                write!(f, "expected Valid account, got {status:?} account")
            }
            Self::OrderInvalid(_) => write!(f, "the order became invalid"),
            Self::MissingCertificate => write!(f, "the valid order has no certificate url"),
            Self::MaxAttemptsExceeded => write!(f, "maximum polling attempts exceeded"),
            Self::InvalidCsr(reason) => write!(f, "invalid certificate signing request: {reason}"),
        }
    }
}

impl StdError for ProtocolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Reqwest(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::InvalidHeader(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(err: reqwest::Error) -> Self {
        Self::Reqwest(err)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

impl From<ErrorStack> for ProtocolError {
    fn from(err: ErrorStack) -> Self {
        Self::Crypto(err)
    }
}
