//! Unattended certificate issuance from Let's Encrypt, or any other ACMEv2 CA, using the DNS-01
//! challenge.
//!
//! ```no_run
//! use dns01cert::{
//!     dns::route53::{Route53Api, Route53Controller},
//!     key, perform_dns01, register_account, Directory, Environment,
//! };
//!
//! # async fn issue<A: Route53Api>(route53: A) -> Result<(), Box<dyn std::error::Error>> {
//! let directory = Directory::from_environment(Environment::Staging).build().await?;
//! let account = register_account(&directory, "admin@example.com", true).await?;
//!
//! let private_key = key::make_key()?;
//! let csr = key::make_csr(&private_key, &["example.com"], false)?;
//!
//! let dns = Route53Controller::new(route53, "Z0123456789");
//! let _chain = perform_dns01(&directory, &account, "example.com", &csr, &dns).await?;
//! # Ok(())
//! # }
//! ```

mod account;
mod api;
pub mod client;
mod directory;
pub mod dns;
mod error;
pub mod key;
mod order;

pub use account::{
    deserialize_account, register_account, serialize_account, Account, AccountBuilder,
    NoPrivateKey, WithPrivateKey,
};
pub use api::{responses, ProtocolError};
pub use client::AcmeClient;
pub use directory::{
    Directory, DirectoryBuilder, Environment, LETS_ENCRYPT_PRODUCTION_URL,
    LETS_ENCRYPT_STAGING_URL,
};
pub use error::Error;
pub use key::{make_csr, make_ecdsa_key, make_key, make_rsa_key, AccountKey, Curve};
pub use order::{perform_dns01, select_dns01_challenge, Dns01Orchestrator, IssueFailure, Stage};
