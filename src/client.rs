//! The seam between issuance and the ACME wire protocol.
//!
//! [`AcmeClient`] is everything the account manager and the DNS-01 orchestrator need from an ACME
//! server. [`Directory`](crate::Directory) implements it over HTTPS; tests substitute a simulated
//! server.

use crate::{
    account::Account,
    api::ProtocolError,
    key::AccountKey,
    responses::{self, Challenge},
};
use serde::{Deserialize, Serialize};

/// The contents of a [newAccount](https://www.rfc-editor.org/rfc/rfc8555.html#section-7.3)
/// request
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NewRegistration {
    /// Contact URLs, e.g. `mailto:admin@example.com`
    pub contacts: Vec<String>,
    /// Whether the operator agreed to the CA's terms of service
    pub terms_of_service_agreed: bool,
}

impl NewRegistration {
    /// A registration with a single email contact
    pub fn from_email(email: &str, terms_of_service_agreed: bool) -> Self {
        NewRegistration {
            contacts: vec![format!("mailto:{email}")],
            terms_of_service_agreed,
        }
    }
}

/// The server-assigned identity of an account plus its metadata
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegistrationResource {
    /// The account object as last returned by the server
    pub body: responses::Account,
    /// The account URL, used as the key ID of every signed request
    pub uri: String,
    /// The terms of service in effect when the account was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
}

/// An authorization together with the URL it was fetched from
#[derive(Clone, Debug)]
pub struct AuthorizationResource {
    pub uri: String,
    pub body: responses::Authorization,
}

/// A pending certificate order
#[derive(Clone, Debug)]
pub struct OrderResource {
    /// The order URL
    pub uri: String,
    pub body: responses::Order,
    /// The order's authorizations, in the order the server listed them
    pub authorizations: Vec<AuthorizationResource>,
    /// The PEM-encoded CSR the order was created from
    pub csr_pem: Vec<u8>,
}

/// An order that reached the `valid` state
#[derive(Clone, Debug)]
pub struct FinalizedOrder {
    pub order: OrderResource,
    /// The issued certificate followed by its issuer chain, PEM-encoded
    pub fullchain_pem: Vec<u8>,
}

/// The response to a challenge.
///
/// ACME v2 servers compute the key authorization themselves, so only an empty object is sent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dns01Response {
    pub key_authorization: String,
}

/// The operations of an ACME server used for DNS-01 issuance.
///
/// Implementations own all protocol-level concerns: signing, nonces, polling and backoff.
#[async_trait::async_trait]
pub trait AcmeClient: Send + Sync {
    /// The directory URL this client talks to
    fn directory_url(&self) -> &str;

    /// Register a new account for the key
    async fn new_account(
        &self,
        registration: &NewRegistration,
        key: &AccountKey,
    ) -> Result<RegistrationResource, ProtocolError>;

    /// Re-fetch an existing registration, failing if the server no longer accepts it
    async fn query_registration(
        &self,
        registration: &RegistrationResource,
        key: &AccountKey,
    ) -> Result<RegistrationResource, ProtocolError>;

    /// Create an order for the DNS names in the CSR and fetch its authorizations
    async fn new_order(
        &self,
        account: &Account,
        csr_pem: &[u8],
    ) -> Result<OrderResource, ProtocolError>;

    /// Tell the server the challenge is ready to be validated
    async fn answer_challenge(
        &self,
        account: &Account,
        challenge: &Challenge,
        response: &Dns01Response,
    ) -> Result<(), ProtocolError>;

    /// Wait for the order to become ready, finalize it and download the certificate chain
    async fn poll_and_finalize(
        &self,
        account: &Account,
        order: &OrderResource,
    ) -> Result<FinalizedOrder, ProtocolError>;
}
