use crate::{
    api::ProtocolError,
    client::{AcmeClient, NewRegistration, RegistrationResource},
    error::{Error, Result},
    key::{AccountKey, PrivateJwk},
    responses::AccountStatus,
};
use openssl::pkey::{PKey, Private};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub struct NoPrivateKey;
pub struct WithPrivateKey(PKey<Private>);

/// Used to configure the creation of an account
pub struct AccountBuilder<'c, C: ?Sized, T> {
    client: &'c C,

    contacts: Vec<String>,
    terms_of_service_agreed: bool,
    private_key: T,
}

impl<'c, C: AcmeClient + ?Sized, T> AccountBuilder<'c, C, T> {
    /// Specify whether the ToS for the CA are agreed to
    pub fn terms_of_service_agreed(mut self, agreed: bool) -> Self {
        self.terms_of_service_agreed = agreed;
        self
    }

    /// Set the account contacts
    pub fn contacts(mut self, contacts: Vec<String>) -> Self {
        self.contacts = contacts;
        self
    }

    /// Add an email address to the account contacts
    pub fn email(mut self, email: &str) -> Self {
        self.contacts.push(format!("mailto:{email}"));
        self
    }

    fn registration(&self) -> NewRegistration {
        NewRegistration {
            contacts: self.contacts.clone(),
            terms_of_service_agreed: self.terms_of_service_agreed,
        }
    }
}

impl<'c, C: AcmeClient + ?Sized> AccountBuilder<'c, C, NoPrivateKey> {
    pub(crate) fn new(client: &'c C) -> Self {
        AccountBuilder {
            client,
            contacts: Vec::new(),
            terms_of_service_agreed: false,
            private_key: NoPrivateKey,
        }
    }

    /// Set the account's private key
    pub fn private_key(self, key: PKey<Private>) -> AccountBuilder<'c, C, WithPrivateKey> {
        AccountBuilder {
            client: self.client,
            contacts: self.contacts,
            terms_of_service_agreed: self.terms_of_service_agreed,
            private_key: WithPrivateKey(key),
        }
    }

    /// Register the account with a freshly generated P-256 key
    pub async fn create(self) -> Result<Account> {
        let key = AccountKey::generate()?;
        into_account(self.client, &self.registration(), key).await
    }
}

impl<'c, C: AcmeClient + ?Sized> AccountBuilder<'c, C, WithPrivateKey> {
    /// Register the account with the configured key
    pub async fn create(self) -> Result<Account> {
        let registration = self.registration();
        let key = AccountKey::from_pkey(self.private_key.0)?;
        into_account(self.client, &registration, key).await
    }
}

/// Submit the registration and check the server accepted the account
async fn into_account<C: AcmeClient + ?Sized>(
    client: &C,
    registration: &NewRegistration,
    key: AccountKey,
) -> Result<Account> {
    let registration = client.new_account(registration, &key).await?;
    if let Some(status) = registration
        .body
        .status
        .filter(|s| *s != AccountStatus::Valid)
    {
        return Err(ProtocolError::InvalidAccount(status).into());
    }

    info!(account = %registration.uri, "created account");
    Ok(Account::new(key, registration, client.directory_url()))
}

/// An authenticated identity at an ACME server
#[derive(Clone, Debug)]
pub struct Account {
    key: AccountKey,
    registration: RegistrationResource,
    directory_url: String,
}

impl Account {
    pub fn new<S: Into<String>>(
        key: AccountKey,
        registration: RegistrationResource,
        directory_url: S,
    ) -> Self {
        Account {
            key,
            registration,
            directory_url: directory_url.into(),
        }
    }

    /// The key every request of the account is signed with
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn registration(&self) -> &RegistrationResource {
        &self.registration
    }

    /// The account URL, also used as the key ID in signed requests
    pub fn uri(&self) -> &str {
        &self.registration.uri
    }

    /// The directory the account was registered with
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }
}

/// The on-disk shape of an account
#[derive(Deserialize, Serialize)]
struct PersistedAccount {
    acc_key: PrivateJwk,
    regr: RegistrationResource,
}

/// Register a new account with a single email contact and a generated key
pub async fn register_account<C: AcmeClient + ?Sized>(
    client: &C,
    email: &str,
    agree_tos: bool,
) -> Result<Account> {
    let registration = NewRegistration::from_email(email, agree_tos);
    into_account(client, &registration, AccountKey::generate()?).await
}

/// Serialize the account key and registration so the account can be restored later.
///
/// The output contains the private key in plain text.
pub fn serialize_account(account: &Account) -> Result<Vec<u8>> {
    let persisted = PersistedAccount {
        acc_key: account.key.to_private_jwk()?,
        regr: account.registration.clone(),
    };
    serde_json::to_vec(&persisted).map_err(Error::Serialization)
}

/// Restore an account and check it is still usable with the server
pub async fn deserialize_account<C: AcmeClient + ?Sized>(
    client: &C,
    data: &[u8],
) -> Result<Account> {
    let persisted =
        serde_json::from_slice::<PersistedAccount>(data).map_err(Error::Deserialization)?;
    let key = AccountKey::from_private_jwk(&persisted.acc_key)?;
    debug!(account = %persisted.regr.uri, "restoring account");

    let registration = client.query_registration(&persisted.regr, &key).await?;
    Ok(Account::new(key, registration, client.directory_url()))
}
