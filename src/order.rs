//! Turning an order into a certificate by answering a DNS-01 challenge.
//!
//! An issuance moves through the [`Stage`]s in order:
//!
//! 1. the order is submitted for the names in the CSR
//! 2. the first DNS-01 challenge offered is selected
//! 3. the challenge record is published and confirmed to have propagated
//! 4. the server is told to validate the challenge
//! 5. the order is finalized and the certificate chain downloaded
//! 6. the challenge record is removed
//!
//! A failure at any point ends the issuance without touching the DNS again. Use
//! [`Dns01Orchestrator::issue`] to learn which record may have been left behind.
//!
//! Wildcard names are validated on their base domain: the record for `*.example.com` is
//! `_acme-challenge.example.com`.

use crate::{
    account::Account,
    client::{AcmeClient, OrderResource},
    dns::{Dns01Record, DnsController},
    error::{Error, Result},
    responses::{Challenge, ChallengeType},
};
use std::fmt::{Display, Formatter};
use tracing::{debug, info, warn};

/// How far an issuance got
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    Created,
    OrderSubmitted,
    ChallengeSelected,
    /// The record was published and has propagated
    DnsRecordUpserted,
    ChallengeAnswered,
    Finalizing,
    Issued,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Created => "created",
            Stage::OrderSubmitted => "order submitted",
            Stage::ChallengeSelected => "challenge selected",
            Stage::DnsRecordUpserted => "dns record upserted",
            Stage::ChallengeAnswered => "challenge answered",
            Stage::Finalizing => "finalizing",
            Stage::Issued => "issued",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An issuance that did not produce a certificate
#[derive(Debug)]
pub struct IssueFailure {
    /// The stage the issuance had reached when it failed
    pub stage: Stage,
    /// The challenge record, once it was derived. It may still be published if the failure
    /// happened after [`Stage::ChallengeSelected`].
    pub record: Option<Dns01Record>,
    /// The PEM-encoded full chain when the certificate was issued but the record could not be
    /// removed
    pub chain: Option<Vec<u8>>,
    pub error: Error,
}

impl From<IssueFailure> for Error {
    fn from(failure: IssueFailure) -> Self {
        failure.error
    }
}

/// Find the first DNS-01 challenge across all of the order's authorizations, in the order the
/// server listed them.
pub fn select_dns01_challenge<'o>(order: &'o OrderResource, domain: &str) -> Result<&'o Challenge> {
    order
        .authorizations
        .iter()
        .flat_map(|authorization| authorization.body.challenges.iter())
        .find(|challenge| challenge.type_ == ChallengeType::Dns01)
        .ok_or_else(|| Error::ChallengeUnavailable {
            domain: domain.to_owned(),
        })
}

#[derive(Default)]
struct Progress {
    record: Option<Dns01Record>,
    chain: Option<Vec<u8>>,
}

/// Drives a single DNS-01 issuance
pub struct Dns01Orchestrator<'a, C: ?Sized, D: ?Sized> {
    client: &'a C,
    account: &'a Account,
    dns: &'a D,
    stage: Stage,
}

impl<'a, C, D> Dns01Orchestrator<'a, C, D>
where
    C: AcmeClient + ?Sized,
    D: DnsController + ?Sized,
{
    pub fn new(client: &'a C, account: &'a Account, dns: &'a D) -> Self {
        Dns01Orchestrator {
            client,
            account,
            dns,
            stage: Stage::Created,
        }
    }

    /// The stage the orchestrator last reached
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage, domain: &str) {
        debug!(domain, from = %self.stage, to = %stage, "issuance advanced");
        self.stage = stage;
    }

    /// Issue a certificate for the CSR, returning the PEM-encoded full chain.
    ///
    /// A leading `*.` is stripped from `domain` before the record name is built. If removing the
    /// record fails after the certificate was issued, the failure is reported at
    /// [`Stage::Issued`] and carries the chain.
    pub async fn issue(
        &mut self,
        domain: &str,
        csr_pem: &[u8],
    ) -> std::result::Result<Vec<u8>, IssueFailure> {
        let mut progress = Progress::default();
        match self.run(domain, csr_pem, &mut progress).await {
            Ok(chain) => Ok(chain),
            Err(error) => {
                let stage = self.stage;
                warn!(domain, %stage, %error, "issuance failed");
                self.stage = Stage::Failed;
                Err(IssueFailure {
                    stage,
                    record: progress.record,
                    chain: progress.chain,
                    error,
                })
            }
        }
    }

    async fn run(
        &mut self,
        domain: &str,
        csr_pem: &[u8],
        progress: &mut Progress,
    ) -> Result<Vec<u8>> {
        let order = self.client.new_order(self.account, csr_pem).await?;
        self.advance(Stage::OrderSubmitted, domain);

        let challenge = select_dns01_challenge(&order, domain)?;
        let (record, response) = Dns01Record::derive(challenge, domain, self.account.key());
        progress.record = Some(record.clone());
        self.advance(Stage::ChallengeSelected, domain);

        self.dns.upsert(&record.name, &record.value).await?;
        self.advance(Stage::DnsRecordUpserted, domain);

        self.client
            .answer_challenge(self.account, challenge, &response)
            .await?;
        self.advance(Stage::ChallengeAnswered, domain);

        self.advance(Stage::Finalizing, domain);
        let finalized = self.client.poll_and_finalize(self.account, &order).await?;
        self.advance(Stage::Issued, domain);
        info!(domain, order = %finalized.order.uri, "certificate issued");

        let chain = finalized.fullchain_pem;
        if let Err(error) = self.dns.cleanup(&record.name, &record.value).await {
            progress.chain = Some(chain);
            return Err(error.into());
        }
        Ok(chain)
    }
}

/// Issue a certificate for `domain` by answering a DNS-01 challenge, returning the PEM-encoded
/// full chain.
///
/// The record is published at `_acme-challenge.<domain>`, with a leading `*.` removed from
/// `domain` first, so `*.example.com` and `example.com` share `_acme-challenge.example.com`.
///
/// The challenge record is only removed once the certificate was issued. A failure to remove it
/// is returned as an error; use [`Dns01Orchestrator::issue`] to keep the chain in that case.
pub async fn perform_dns01<C, D>(
    client: &C,
    account: &Account,
    domain: &str,
    csr_pem: &[u8],
    dns: &D,
) -> Result<Vec<u8>>
where
    C: AcmeClient + ?Sized,
    D: DnsController + ?Sized,
{
    Dns01Orchestrator::new(client, account, dns)
        .issue(domain, csr_pem)
        .await
        .map_err(Error::from)
}
