//! Publishing DNS-01 challenge records.
//!
//! A [`DnsController`] creates and removes the `_acme-challenge` TXT record for a domain. The
//! only realization shipped with the crate targets [Route53](route53::Route53Controller), any
//! other provider can be plugged in by implementing the trait.

use crate::{client::Dns01Response, key::AccountKey, responses::Challenge};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use openssl::sha::sha256;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};

pub mod route53;

/// The label DNS-01 records are published under
const CHALLENGE_LABEL: &str = "_acme-challenge";

/// The type of every DNS-01 record
pub const RECORD_TYPE: &str = "TXT";

/// Creates and removes challenge TXT records.
///
/// Controllers are driven sequentially: `upsert` must only return once the record is visible to
/// the CA.
#[async_trait::async_trait]
pub trait DnsController: Send + Sync {
    /// Create or replace the TXT record `name` holding `value` and wait for it to propagate
    async fn upsert(&self, name: &str, value: &str) -> Result<(), Error>;

    /// Remove the TXT record `name` holding `value`
    async fn cleanup(&self, name: &str, value: &str) -> Result<(), Error>;
}

/// An error raised by a [`DnsController`]
#[derive(Debug)]
pub enum Error {
    /// The change was accepted but not applied within the polling budget
    PropagationTimeout {
        record: String,
        change_id: String,
        /// The last status reported by the provider
        status: String,
        attempts: usize,
    },
    /// The provider failed to process the change
    Provider(Box<dyn StdError + Send + Sync + 'static>),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PropagationTimeout {
                record,
                change_id,
                status,
                attempts,
            } => write!(
                f,
                "change {change_id} for {record} was still {status} after {attempts} checks"
            ),
            Self::Provider(_) => write!(f, "the dns provider rejected the change"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Provider(e) => Some(e.as_ref()),
            Self::PropagationTimeout { .. } => None,
        }
    }
}

/// Used by [`DnsController`]s to convert an arbitrary provider error.
pub fn boxed_err<E>(e: E) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    Error::Provider(Box::new(e))
}

/// The TXT record proving control of a domain for a DNS-01 challenge
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dns01Record {
    /// Fully qualified record name, `_acme-challenge.<domain>`
    pub name: String,
    /// base64url of the SHA-256 digest of the key authorization
    pub value: String,
}

impl Dns01Record {
    /// Derive the record and the challenge response for a domain.
    ///
    /// Wildcard domains are validated on their base domain, so a leading `*.` is dropped.
    pub fn derive(challenge: &Challenge, domain: &str, key: &AccountKey) -> (Self, Dns01Response) {
        let key_authorization = key.key_authorization(&challenge.token);
        let value = BASE64.encode(sha256(key_authorization.as_bytes()));

        let domain = domain.strip_prefix("*.").unwrap_or(domain);
        let record = Dns01Record {
            name: format!("{CHALLENGE_LABEL}.{domain}"),
            value,
        };

        (record, Dns01Response { key_authorization })
    }
}
