use crate::{
    account::{Account, AccountBuilder, NoPrivateKey},
    api::{self, responses::DirectoryMeta, Api, ProtocolError},
    client::{
        AcmeClient, AuthorizationResource, Dns01Response, FinalizedOrder, NewRegistration,
        OrderResource, RegistrationResource,
    },
    key::AccountKey,
    responses::{AccountStatus, Challenge, OrderStatus},
};
use futures::future;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The Let's Encrypt production ACMEv2 API
pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// The Let's Encrypt staging ACMEv2 API
pub const LETS_ENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Which Let's Encrypt deployment to issue from
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Environment {
    #[default]
    Production,
    /// Untrusted certificates with far more generous rate limits
    Staging,
}

impl Environment {
    /// Pick the environment from a "use staging" flag
    pub fn from_staging(staging: bool) -> Self {
        if staging {
            Environment::Staging
        } else {
            Environment::Production
        }
    }

    /// The directory URL of the environment
    pub fn url(&self) -> &'static str {
        match self {
            Environment::Production => LETS_ENCRYPT_PRODUCTION_URL,
            Environment::Staging => LETS_ENCRYPT_STAGING_URL,
        }
    }
}

/// A builder used to create a [`Directory`]
pub struct DirectoryBuilder {
    url: String,
    client: Option<Client>,
    max_nonces: usize,
    finalize_attempts: usize,
    poll_interval: Duration,
}

impl DirectoryBuilder {
    /// Creates a new builder with the specified directory root URL.
    pub fn new(url: String) -> Self {
        DirectoryBuilder {
            url,
            client: None,
            max_nonces: 10,
            finalize_attempts: 30,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Use a custom [`reqwest::Client`] for all outbound HTTP requests
    /// to the ACME server.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the maximum number of nonces to keep, defaults to 10
    pub fn max_nonces(mut self, max: usize) -> Self {
        self.max_nonces = max;
        self
    }

    /// How many times an order is polled while waiting for it to change state, defaults to 30
    pub fn finalize_attempts(mut self, attempts: usize) -> Self {
        self.finalize_attempts = attempts;
        self
    }

    /// How long to wait between order polls, defaults to 2 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build a [`Directory`] using the given parameters.
    ///
    /// If no http client is specified, a default client will be created with
    /// the user-agent `dns01cert/<version>`.
    pub async fn build(self) -> Result<Directory, ProtocolError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder().user_agent(USER_AGENT).build()?,
        };

        let api = Api::from_url(
            self.url,
            client,
            self.max_nonces,
            self.finalize_attempts,
            self.poll_interval,
        )
        .await?;

        Ok(Directory(api))
    }
}

/// Entry point for accessing an ACME API
#[derive(Clone, Debug)]
pub struct Directory(Api);

impl Directory {
    /// Build a new directory with the specified root URL
    pub fn builder<S: Into<String>>(url: S) -> DirectoryBuilder {
        DirectoryBuilder::new(url.into())
    }

    /// Build a new directory for one of the Let's Encrypt environments
    pub fn from_environment(environment: Environment) -> DirectoryBuilder {
        DirectoryBuilder::new(environment.url().to_owned())
    }

    /// Access the builder to create a new account
    pub fn account(&self) -> AccountBuilder<'_, Self, NoPrivateKey> {
        AccountBuilder::new(self)
    }

    /// Get optional metadata about the directory
    #[inline(always)]
    pub fn meta(&self) -> &DirectoryMeta {
        self.0.meta()
    }
}

#[async_trait::async_trait]
impl AcmeClient for Directory {
    fn directory_url(&self) -> &str {
        self.0.url()
    }

    async fn new_account(
        &self,
        registration: &NewRegistration,
        key: &AccountKey,
    ) -> Result<RegistrationResource, ProtocolError> {
        let (uri, body) = self
            .0
            .new_account(
                &registration.contacts,
                registration.terms_of_service_agreed,
                key,
            )
            .await?;
        info!(account = %uri, "registered acme account");

        Ok(RegistrationResource {
            body,
            uri,
            terms_of_service: self.meta().terms_of_service.clone(),
        })
    }

    async fn query_registration(
        &self,
        registration: &RegistrationResource,
        key: &AccountKey,
    ) -> Result<RegistrationResource, ProtocolError> {
        let body = self.0.fetch_account(&registration.uri, key).await?;
        if let Some(status) = body.status.filter(|s| *s != AccountStatus::Valid) {
            return Err(ProtocolError::InvalidAccount(status));
        }

        Ok(RegistrationResource {
            body,
            uri: registration.uri.clone(),
            terms_of_service: registration.terms_of_service.clone(),
        })
    }

    async fn new_order(
        &self,
        account: &Account,
        csr_pem: &[u8],
    ) -> Result<OrderResource, ProtocolError> {
        let (_, identifiers) = api::csr_identifiers(csr_pem)?;
        let (uri, body) = self
            .0
            .new_order(identifiers, account.key(), account.uri())
            .await?;
        debug!(order = %uri, status = ?body.status, "created order");

        let authorizations = future::try_join_all(body.authorizations.iter().map(|url| async move {
            let body = self
                .0
                .fetch_authorization(url, account.key(), account.uri())
                .await?;
            Ok::<_, ProtocolError>(AuthorizationResource {
                uri: url.clone(),
                body,
            })
        }))
        .await?;

        Ok(OrderResource {
            uri,
            body,
            authorizations,
            csr_pem: csr_pem.to_vec(),
        })
    }

    async fn answer_challenge(
        &self,
        account: &Account,
        challenge: &Challenge,
        _response: &Dns01Response,
    ) -> Result<(), ProtocolError> {
        let challenge = self
            .0
            .validate_challenge(&challenge.url, account.key(), account.uri())
            .await?;
        debug!(challenge = %challenge.url, status = ?challenge.status, "answered challenge");
        Ok(())
    }

    async fn poll_and_finalize(
        &self,
        account: &Account,
        order: &OrderResource,
    ) -> Result<FinalizedOrder, ProtocolError> {
        let (key, kid) = (account.key(), account.uri());

        let mut body = self
            .0
            .wait_for_order(&order.uri, key, kid, |o| o.status != OrderStatus::Pending)
            .await?;

        if body.status == OrderStatus::Ready {
            let (csr_der, _) = api::csr_identifiers(&order.csr_pem)?;
            self.0
                .finalize_order(&body.finalize, &csr_der, key, kid)
                .await?;
            body = self
                .0
                .wait_for_order(&order.uri, key, kid, |o| {
                    matches!(o.status, OrderStatus::Valid | OrderStatus::Invalid)
                })
                .await?;
        }

        match body.status {
            OrderStatus::Valid => {}
            OrderStatus::Invalid => return Err(ProtocolError::OrderInvalid(body.error)),
            // A processing order that outlived the polling budget
            _ => return Err(ProtocolError::MaxAttemptsExceeded),
        }

        let url = body
            .certificate
            .as_deref()
            .ok_or(ProtocolError::MissingCertificate)?;
        let chain = self.0.download_certificate(url, key, kid).await?;
        info!(order = %order.uri, "downloaded certificate chain");

        Ok(FinalizedOrder {
            order: OrderResource {
                body,
                ..order.clone()
            },
            fullchain_pem: chain.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Directory, Environment, LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL,
    };
    use crate::{
        account::{register_account, Account},
        api::ProtocolError,
        client::{AcmeClient, OrderResource, RegistrationResource},
        key::{self, AccountKey},
        responses::{AccountStatus, ErrorType, Identifier, Order, OrderStatus},
        Error,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const REPLAY_NONCE: &str = "replay-nonce";
    const CHAIN: &str = "-----BEGIN CERTIFICATE-----\nMIIBleaf\n-----END CERTIFICATE-----\n";

    /// A server publishing a directory and handing out nonces
    async fn acme_server() -> MockServer {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/directory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "newNonce": format!("{uri}/nonce"),
                "newAccount": format!("{uri}/new-account"),
                "newOrder": format!("{uri}/new-order"),
                "meta": { "termsOfService": format!("{uri}/terms") },
            })))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/nonce"))
            .respond_with(ResponseTemplate::new(200).insert_header(REPLAY_NONCE, "fresh"))
            .mount(&server)
            .await;

        server
    }

    async fn directory(server: &MockServer) -> Directory {
        Directory::builder(format!("{}/directory", server.uri()))
            .finalize_attempts(2)
            .poll_interval(Duration::from_millis(1))
            .build()
            .await
            .unwrap()
    }

    fn account(server: &MockServer) -> Account {
        let registration = RegistrationResource {
            body: Default::default(),
            uri: format!("{}/acct/1", server.uri()),
            terms_of_service: None,
        };
        Account::new(
            AccountKey::generate().unwrap(),
            registration,
            format!("{}/directory", server.uri()),
        )
    }

    fn ok(body: Value) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header(REPLAY_NONCE, "next")
            .set_body_json(body)
    }

    fn problem(status: u16, type_: &str) -> ResponseTemplate {
        ResponseTemplate::new(status)
            .insert_header(REPLAY_NONCE, "next")
            .set_body_json(json!({
                "type": format!("urn:ietf:params:acme:error:{type_}"),
                "detail": format!("{type_} from the test server"),
            }))
    }

    fn order_body(server: &MockServer, status: &str, certificate: Option<&str>) -> Value {
        let uri = server.uri();
        json!({
            "status": status,
            "identifiers": [{ "type": "dns", "value": "example.com" }],
            "authorizations": [format!("{uri}/authz/1")],
            "finalize": format!("{uri}/order/1/finalize"),
            "certificate": certificate.map(|c| format!("{uri}{c}")),
        })
    }

    /// An order waiting on its authorizations, as returned by newOrder
    fn pending_order(server: &MockServer) -> OrderResource {
        let pem = key::make_key().unwrap();
        OrderResource {
            uri: format!("{}/order/1", server.uri()),
            body: serde_json::from_value::<Order>(order_body(server, "pending", None)).unwrap(),
            authorizations: Vec::new(),
            csr_pem: key::make_csr(&pem, &["example.com"], false).unwrap(),
        }
    }

    fn new_account_created(server: &MockServer) -> ResponseTemplate {
        ResponseTemplate::new(201)
            .insert_header(REPLAY_NONCE, "next")
            .insert_header("location", format!("{}/acct/7", server.uri()).as_str())
            .set_body_json(json!({
                "status": "valid",
                "contact": ["mailto:admin@example.com"],
            }))
    }

    #[test_log::test(tokio::test)]
    async fn new_account_uses_the_location_header() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(new_account_created(&server))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;

        let account = register_account(&directory, "admin@example.com", true)
            .await
            .unwrap();

        assert_eq!(account.uri(), format!("{}/acct/7", server.uri()));
        assert_eq!(account.directory_url(), directory.directory_url());
        assert_eq!(
            account.registration().terms_of_service,
            Some(format!("{}/terms", server.uri()))
        );
        assert_eq!(account.registration().body.status, Some(AccountStatus::Valid));
    }

    #[test_log::test(tokio::test)]
    async fn new_account_without_location_is_rejected() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(ok(json!({ "status": "valid" })))
            .mount(&server)
            .await;
        let directory = directory(&server).await;

        let error = register_account(&directory, "admin@example.com", true)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::Protocol(ProtocolError::MissingHeader("location"))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn bad_nonce_is_retried() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(problem(400, "badNonce"))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(new_account_created(&server))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;

        let account = register_account(&directory, "admin@example.com", true)
            .await
            .unwrap();
        assert_eq!(account.uri(), format!("{}/acct/7", server.uri()));
    }

    #[test_log::test(tokio::test)]
    async fn persistent_bad_nonce_gives_up() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(problem(400, "badNonce"))
            .expect(4)
            .mount(&server)
            .await;
        let directory = directory(&server).await;

        let error = register_account(&directory, "admin@example.com", true)
            .await
            .unwrap_err();
        match error {
            Error::Protocol(error) => {
                assert!(matches!(error, ProtocolError::Server(_)));
                assert_eq!(error.problem_type(), Some(&ErrorType::BadNonce));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn other_problems_are_not_retried() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/new-account"))
            .respond_with(problem(429, "rateLimited"))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;

        let error = register_account(&directory, "admin@example.com", true)
            .await
            .unwrap_err();
        match error {
            Error::Protocol(error) => {
                assert_eq!(error.problem_type(), Some(&ErrorType::RateLimited))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn query_registration_rejects_deactivated_account() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/acct/1"))
            .respond_with(ok(json!({ "status": "deactivated" })))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let error = directory
            .query_registration(account.registration(), account.key())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ProtocolError::InvalidAccount(AccountStatus::Deactivated)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn authorizations_keep_the_server_order() {
        let server = acme_server().await;
        let uri = server.uri();
        Mock::given(method("POST"))
            .and(path("/new-order"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header(REPLAY_NONCE, "next")
                    .insert_header("location", format!("{uri}/order/1").as_str())
                    .set_body_json(json!({
                        "status": "pending",
                        "identifiers": [
                            { "type": "dns", "value": "b.example.com" },
                            { "type": "dns", "value": "a.example.com" },
                        ],
                        "authorizations": [format!("{uri}/authz/b"), format!("{uri}/authz/a")],
                        "finalize": format!("{uri}/order/1/finalize"),
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;
        for (name, delay) in [("b", 50), ("a", 0)] {
            Mock::given(method("POST"))
                .and(path(format!("/authz/{name}")))
                .respond_with(
                    ok(json!({
                        "identifier": { "type": "dns", "value": format!("{name}.example.com") },
                        "status": "pending",
                        "challenges": [{
                            "url": format!("{uri}/chall/{name}"),
                            "status": "pending",
                            "type": "dns-01",
                            "token": format!("token-{name}"),
                        }],
                    }))
                    .set_delay(Duration::from_millis(delay)),
                )
                .expect(1)
                .mount(&server)
                .await;
        }
        let directory = directory(&server).await;
        let account = account(&server);

        let pem = key::make_key().unwrap();
        let csr = key::make_csr(&pem, &["b.example.com", "a.example.com"], false).unwrap();
        let order = directory.new_order(&account, &csr).await.unwrap();

        assert_eq!(order.uri, format!("{uri}/order/1"));
        assert_eq!(order.csr_pem, csr);
        let identifiers = order
            .authorizations
            .iter()
            .map(|a| a.body.identifier.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            identifiers,
            vec![
                Identifier::Dns("b.example.com".into()),
                Identifier::Dns("a.example.com".into()),
            ]
        );
        assert_eq!(order.authorizations[0].uri, format!("{uri}/authz/b"));
        assert_eq!(order.authorizations[0].body.challenges[0].token, "token-b");
    }

    #[test_log::test(tokio::test)]
    async fn answer_challenge_posts_to_the_challenge() {
        let server = acme_server().await;
        let uri = server.uri();
        Mock::given(method("POST"))
            .and(path("/chall/1"))
            .respond_with(ok(json!({
                "url": format!("{uri}/chall/1"),
                "status": "processing",
                "type": "dns-01",
                "token": "tok",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let challenge = serde_json::from_value(json!({
            "url": format!("{uri}/chall/1"),
            "status": "pending",
            "type": "dns-01",
            "token": "tok",
        }))
        .unwrap();
        let response = crate::client::Dns01Response {
            key_authorization: "tok.thumbprint".into(),
        };
        directory
            .answer_challenge(&account, &challenge, &response)
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn poll_and_finalize_downloads_the_chain() {
        let server = acme_server().await;
        for (priority, status, certificate) in [
            (1, "pending", None),
            (2, "ready", None),
            (3, "valid", Some("/cert/1")),
        ] {
            let mock = Mock::given(method("POST"))
                .and(path("/order/1"))
                .respond_with(ok(order_body(&server, status, certificate)))
                .with_priority(priority);
            let mock = if priority < 3 { mock.up_to_n_times(1) } else { mock };
            mock.expect(1).mount(&server).await;
        }
        Mock::given(method("POST"))
            .and(path("/order/1/finalize"))
            .respond_with(ok(order_body(&server, "processing", None)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cert/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(REPLAY_NONCE, "next")
                    .set_body_string(CHAIN),
            )
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let finalized = directory
            .poll_and_finalize(&account, &pending_order(&server))
            .await
            .unwrap();

        assert_eq!(finalized.fullchain_pem, CHAIN.as_bytes());
        assert_eq!(finalized.order.body.status, OrderStatus::Valid);
        assert_eq!(
            finalized.order.body.certificate,
            Some(format!("{}/cert/1", server.uri()))
        );
    }

    #[test_log::test(tokio::test)]
    async fn invalid_order_reports_the_problem() {
        let server = acme_server().await;
        let mut body = order_body(&server, "invalid", None);
        body["error"] = json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
            "detail": "no TXT record found",
        });
        Mock::given(method("POST"))
            .and(path("/order/1"))
            .respond_with(ok(body))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/order/1/finalize"))
            .respond_with(ok(order_body(&server, "processing", None)))
            .expect(0)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let error = directory
            .poll_and_finalize(&account, &pending_order(&server))
            .await
            .unwrap_err();
        assert_eq!(error.problem_type(), Some(&ErrorType::Unauthorized));
        match error {
            ProtocolError::OrderInvalid(Some(problem)) => {
                assert_eq!(problem.detail.as_deref(), Some("no TXT record found"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn valid_order_without_certificate() {
        let server = acme_server().await;
        Mock::given(method("POST"))
            .and(path("/order/1"))
            .respond_with(ok(order_body(&server, "valid", None)))
            .expect(1)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let error = directory
            .poll_and_finalize(&account, &pending_order(&server))
            .await
            .unwrap_err();
        assert!(matches!(error, ProtocolError::MissingCertificate));
    }

    #[test_log::test(tokio::test)]
    async fn pending_order_exhausts_the_attempts() {
        let server = acme_server().await;
        // The first fetch plus one per configured attempt
        Mock::given(method("POST"))
            .and(path("/order/1"))
            .respond_with(ok(order_body(&server, "pending", None)))
            .expect(3)
            .mount(&server)
            .await;
        let directory = directory(&server).await;
        let account = account(&server);

        let error = directory
            .poll_and_finalize(&account, &pending_order(&server))
            .await
            .unwrap_err();
        assert!(matches!(error, ProtocolError::MaxAttemptsExceeded));
    }

    #[test]
    fn environment_urls() {
        assert_eq!(
            Environment::Production.url(),
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            Environment::Staging.url(),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
    }

    #[test]
    fn environment_from_staging_flag() {
        assert_eq!(Environment::from_staging(true).url(), LETS_ENCRYPT_STAGING_URL);
        assert_eq!(
            Environment::from_staging(false).url(),
            LETS_ENCRYPT_PRODUCTION_URL
        );
        assert_eq!(Environment::default(), Environment::Production);
    }

    #[test]
    fn builder_targets_environment() {
        let builder = Directory::from_environment(Environment::Staging);
        assert_eq!(builder.url, LETS_ENCRYPT_STAGING_URL);
        assert_eq!(builder.max_nonces, 10);
    }
}
