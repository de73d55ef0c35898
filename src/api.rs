use crate::key::AccountKey;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use reqwest::{header, Client, Response};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, warn};
use x509_parser::{
    certification_request::X509CertificationRequest, extensions::GeneralName,
    extensions::ParsedExtension, pem::parse_x509_pem, prelude::FromDer,
};

mod error;
mod jws;
mod nonce;
pub mod responses;

pub use error::ProtocolError;
use responses::{ErrorType, Identifier};

type Result<T, E = ProtocolError> = std::result::Result<T, E>;

const PEM_CHAIN: &str = "application/pem-certificate-chain";
const JSON: &str = "application/json";

/// How often a signed request is replayed after the server rejected its nonce
const BAD_NONCE_RETRIES: usize = 3;

#[derive(Debug)]
pub(crate) struct Api(Arc<ApiInner>);

#[derive(Debug)]
struct ApiInner {
    client: Client,
    url: String,
    urls: responses::Directory,
    nonces: nonce::Pool,
    max_attempts: usize,
    interval: Duration,
}

impl Api {
    /// Construct the API for a directory from a URL
    pub(crate) async fn from_url(
        url: String,
        client: Client,
        max_nonces: usize,
        max_attempts: usize,
        interval: Duration,
    ) -> Result<Api> {
        let urls = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(directory = %url, "resolved acme directory");

        let inner = ApiInner {
            client,
            url,
            urls,
            nonces: nonce::Pool::new(max_nonces),
            max_attempts,
            interval,
        };
        Ok(Api(Arc::new(inner)))
    }

    /// The URL the directory was fetched from
    #[inline(always)]
    pub(crate) fn url(&self) -> &str {
        &self.0.url
    }

    /// Get optional metadata about the directory
    #[inline(always)]
    pub(crate) fn meta(&self) -> &responses::DirectoryMeta {
        &self.0.urls.meta
    }

    /// Retrieve the next nonce from the pool
    #[inline(always)]
    async fn next_nonce(&self) -> Result<String> {
        self.0
            .nonces
            .get(&self.0.urls.new_nonce, &self.0.client)
            .await
    }

    /// Perform an authenticated request to the API with a JSON body
    async fn request_json<S: Serialize>(
        &self,
        url: &str,
        body: &S,
        key: &AccountKey,
        account_url: Option<&str>,
    ) -> Result<Response> {
        let body = serde_json::to_string(body)?;
        self.request(url, &body, key, account_url, JSON).await
    }

    /// Perform an authenticated request to the API.
    ///
    /// An empty body makes the request a POST-as-GET.
    async fn request(
        &self,
        url: &str,
        body: &str,
        key: &AccountKey,
        account_url: Option<&str>,
        accept: &'static str,
    ) -> Result<Response> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let nonce = self.next_nonce().await?;
            let jws = jws::sign(url, &nonce, body, key, account_url)?;
            let jws = serde_json::to_vec(&jws)?;

            let response = self
                .0
                .client
                .post(url)
                .header(header::CONTENT_TYPE, "application/jose+json")
                .header(header::ACCEPT, accept)
                .body(jws)
                .send()
                .await?;

            self.0.nonces.extract_from_headers(response.headers())?;

            if response.status().is_success() {
                return Ok(response);
            }

            let err = response.json::<responses::Error>().await?;
            if err.type_ == ErrorType::BadNonce && attempt <= BAD_NONCE_RETRIES {
                debug!(url, attempt, "server rejected nonce, retrying");
                continue;
            }

            warn!(url, problem = err.type_.code(), detail = ?err.detail, "acme request failed");
            return Err(ProtocolError::Server(err));
        }
    }

    /// Perform the [newAccount](https://www.rfc-editor.org/rfc/rfc8555.html#section-7.3) operation.
    /// Returns the account's URL and creation response.
    pub async fn new_account(
        &self,
        contacts: &[String],
        terms_of_service_agreed: bool,
        key: &AccountKey,
    ) -> Result<(String, responses::Account)> {
        let payload = responses::NewAccount {
            contacts,
            terms_of_service_agreed,
            only_return_existing: false,
        };
        let response = self
            .request_json(&self.0.urls.new_account, &payload, key, None)
            .await?;

        let url = location_header(&response)?;
        let account = response.json().await?;
        Ok((url, account))
    }

    /// Fetch the account object. An empty update is used as RFC 8555 does not allow
    /// POST-as-GET on account URLs.
    pub async fn fetch_account(
        &self,
        account_url: &str,
        key: &AccountKey,
    ) -> Result<responses::Account> {
        let response = self
            .request(account_url, "{}", key, Some(account_url), JSON)
            .await?;
        Ok(response.json().await?)
    }

    /// Perform the [newOrder](https://www.rfc-editor.org/rfc/rfc8555.html#section-7.4) operation.
    /// Returns the order's URL and creation response.
    pub async fn new_order(
        &self,
        identifiers: Vec<Identifier>,
        key: &AccountKey,
        account_url: &str,
    ) -> Result<(String, responses::Order)> {
        let payload = responses::NewOrder { identifiers };
        let response = self
            .request_json(&self.0.urls.new_order, &payload, key, Some(account_url))
            .await?;

        let url = location_header(&response)?;
        let order = response.json().await?;
        Ok((url, order))
    }

    /// Fetch an order
    pub async fn fetch_order(
        &self,
        url: &str,
        key: &AccountKey,
        account_url: &str,
    ) -> Result<responses::Order> {
        let response = self.request(url, "", key, Some(account_url), JSON).await?;
        Ok(response.json().await?)
    }

    /// Fetch an authorization
    pub async fn fetch_authorization(
        &self,
        url: &str,
        key: &AccountKey,
        account_url: &str,
    ) -> Result<responses::Authorization> {
        let response = self.request(url, "", key, Some(account_url), JSON).await?;
        Ok(response.json().await?)
    }

    /// Enqueue a challenge for validation
    pub async fn validate_challenge(
        &self,
        url: &str,
        key: &AccountKey,
        account_url: &str,
    ) -> Result<responses::Challenge> {
        let response = self
            .request(url, "{}", key, Some(account_url), JSON)
            .await?;
        Ok(response.json().await?)
    }

    /// Finalize an order using the provided DER-encoded CSR
    pub async fn finalize_order(
        &self,
        url: &str,
        csr_der: &[u8],
        key: &AccountKey,
        account_url: &str,
    ) -> Result<responses::Order> {
        let payload = responses::FinalizeOrder {
            csr: BASE64.encode(csr_der),
        };
        let response = self
            .request_json(url, &payload, key, Some(account_url))
            .await?;
        Ok(response.json().await?)
    }

    /// Download the PEM certificate chain of a valid order
    pub async fn download_certificate(
        &self,
        url: &str,
        key: &AccountKey,
        account_url: &str,
    ) -> Result<String> {
        let response = self
            .request(url, "", key, Some(account_url), PEM_CHAIN)
            .await?;
        Ok(response.text().await?)
    }

    /// Poll the order until it meets a condition or the maximum attempts are exceeded.
    pub async fn wait_for_order<P>(
        &self,
        url: &str,
        key: &AccountKey,
        account_url: &str,
        predicate: P,
    ) -> Result<responses::Order>
    where
        P: Fn(&responses::Order) -> bool,
    {
        let mut order = self.fetch_order(url, key, account_url).await?;
        let mut attempts: usize = 0;

        while !predicate(&order) {
            if attempts >= self.0.max_attempts {
                return Err(ProtocolError::MaxAttemptsExceeded);
            }

            time::sleep(self.0.interval).await;

            order = self.fetch_order(url, key, account_url).await?;
            attempts += 1;
        }

        Ok(order)
    }
}

impl Clone for Api {
    fn clone(&self) -> Self {
        Api(Arc::clone(&self.0))
    }
}

fn location_header(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get(header::LOCATION)
        .ok_or(ProtocolError::MissingHeader("location"))?
        .to_str()
        .map_err(|e| ProtocolError::InvalidHeader("location", e))?
        .to_owned())
}

/// Decode a PEM CSR into its DER form and the DNS identifiers it requests
pub(crate) fn csr_identifiers(csr_pem: &[u8]) -> Result<(Vec<u8>, Vec<Identifier>)> {
    let (_, pem) = parse_x509_pem(csr_pem).map_err(|e| ProtocolError::InvalidCsr(e.to_string()))?;
    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| ProtocolError::InvalidCsr(e.to_string()))?;

    let mut identifiers = Vec::new();
    for extension in csr.requested_extensions().into_iter().flatten() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    let identifier = Identifier::Dns(dns.to_string());
                    // Duplicates in the CSR are fine, but not in the order
                    if !identifiers.contains(&identifier) {
                        identifiers.push(identifier);
                    }
                }
            }
        }
    }

    if identifiers.is_empty() {
        return Err(ProtocolError::InvalidCsr("no dns names requested".into()));
    }

    Ok((pem.contents.clone(), identifiers))
}
