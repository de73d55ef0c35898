//! DNS-01 records hosted in an [AWS Route53](https://aws.amazon.com/route53/) zone.
//!
//! The calls into Route53 go through [`Route53Api`]. With the `route53` feature enabled it is
//! implemented for [`aws_sdk_route53::Client`], and [`Route53Controller::from_env`] loads the
//! credentials and region from the environment.

use super::{DnsController, Error, RECORD_TYPE};
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

/// The status Route53 reports once a change reached all authoritative name servers
pub const INSYNC: &str = "INSYNC";

/// What to do with a record
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeAction {
    Upsert,
    Delete,
}

impl ChangeAction {
    /// The action as named in a Route53 change batch
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Upsert => "UPSERT",
            ChangeAction::Delete => "DELETE",
        }
    }
}

/// A single-value TXT record change
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordChange {
    pub action: ChangeAction,
    pub name: String,
    pub ttl: i64,
    /// The record value, already wrapped in double quotes
    pub value: String,
}

impl RecordChange {
    fn txt(action: ChangeAction, name: &str, value: &str, ttl: i64) -> Self {
        RecordChange {
            action,
            name: name.to_owned(),
            ttl,
            value: format!("\"{value}\""),
        }
    }
}

/// The state of a submitted change batch
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeInfo {
    pub id: String,
    /// Either `PENDING` or `INSYNC`
    pub status: String,
}

impl ChangeInfo {
    pub fn is_in_sync(&self) -> bool {
        self.status == INSYNC
    }
}

/// The Route53 operations needed to publish a record
#[async_trait::async_trait]
pub trait Route53Api: Send + Sync {
    /// Submit a change batch holding a single change
    async fn change_resource_record_sets(
        &self,
        hosted_zone_id: &str,
        change: &RecordChange,
    ) -> Result<ChangeInfo, Error>;

    /// Look up the current state of a change batch
    async fn get_change(&self, change_id: &str) -> Result<ChangeInfo, Error>;
}

/// A [`DnsController`] publishing records in a single hosted zone
#[derive(Debug)]
pub struct Route53Controller<A> {
    api: A,
    hosted_zone_id: String,
    attempts: usize,
    interval: Duration,
    ttl: i64,
}

impl<A: Route53Api> Route53Controller<A> {
    /// Create a controller for the hosted zone
    pub fn new<S: Into<String>>(api: A, hosted_zone_id: S) -> Self {
        Route53Controller {
            api,
            hosted_zone_id: hosted_zone_id.into(),
            attempts: 120,
            interval: Duration::from_secs(2),
            ttl: 60,
        }
    }

    /// How many times a change is checked before giving up. Defaults to 120 tries.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// How long to wait between successive checks. Defaults to 2 seconds.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The TTL of created records in seconds. Defaults to 60.
    pub fn ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// The client used to talk to Route53
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Poll the change until it is in sync or the attempts are exhausted
    async fn wait_for_change(&self, record: &str, change: ChangeInfo) -> Result<(), Error> {
        let mut status = change.status;

        for attempt in 1..=self.attempts {
            let current = self.api.get_change(&change.id).await?;
            if current.is_in_sync() {
                debug!(record, change_id = %change.id, attempt, "change in sync");
                return Ok(());
            }

            status = current.status;
            if attempt < self.attempts {
                time::sleep(self.interval).await;
            }
        }

        warn!(record, change_id = %change.id, %status, attempts = self.attempts, "change never reached INSYNC");
        Err(Error::PropagationTimeout {
            record: record.to_owned(),
            change_id: change.id,
            status,
            attempts: self.attempts,
        })
    }
}

#[async_trait::async_trait]
impl<A: Route53Api> DnsController for Route53Controller<A> {
    async fn upsert(&self, name: &str, value: &str) -> Result<(), Error> {
        let change = RecordChange::txt(ChangeAction::Upsert, name, value, self.ttl);
        let info = self
            .api
            .change_resource_record_sets(&self.hosted_zone_id, &change)
            .await?;
        info!(
            record = name,
            record_type = RECORD_TYPE,
            action = change.action.as_str(),
            change_id = %info.id,
            "submitted record"
        );

        self.wait_for_change(name, info).await
    }

    async fn cleanup(&self, name: &str, value: &str) -> Result<(), Error> {
        let change = RecordChange::txt(ChangeAction::Delete, name, value, self.ttl);
        let info = self
            .api
            .change_resource_record_sets(&self.hosted_zone_id, &change)
            .await?;
        info!(
            record = name,
            record_type = RECORD_TYPE,
            action = change.action.as_str(),
            change_id = %info.id,
            "removed record"
        );
        Ok(())
    }
}

#[cfg(feature = "route53")]
mod sdk {
    use super::{ChangeInfo, RecordChange, Route53Api, Route53Controller};
    use crate::dns::{boxed_err, Error};
    use aws_sdk_route53::{
        types::{self, Change, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType},
        Client,
    };

    impl From<&types::ChangeInfo> for ChangeInfo {
        fn from(info: &types::ChangeInfo) -> Self {
            ChangeInfo {
                id: info.id().to_owned(),
                status: info.status().as_str().to_owned(),
            }
        }
    }

    fn missing_change_info() -> Error {
        Error::Provider("route53 response did not include change info".into())
    }

    #[async_trait::async_trait]
    impl Route53Api for Client {
        async fn change_resource_record_sets(
            &self,
            hosted_zone_id: &str,
            change: &RecordChange,
        ) -> Result<ChangeInfo, Error> {
            let record = ResourceRecord::builder()
                .value(&change.value)
                .build()
                .map_err(boxed_err)?;
            let record_set = ResourceRecordSet::builder()
                .name(&change.name)
                .r#type(RrType::Txt)
                .ttl(change.ttl)
                .resource_records(record)
                .build()
                .map_err(boxed_err)?;
            let action = types::ChangeAction::from(change.action.as_str());
            let batch = ChangeBatch::builder()
                .changes(
                    Change::builder()
                        .action(action)
                        .resource_record_set(record_set)
                        .build()
                        .map_err(boxed_err)?,
                )
                .build()
                .map_err(boxed_err)?;

            let output = self
                .change_resource_record_sets()
                .hosted_zone_id(hosted_zone_id)
                .change_batch(batch)
                .send()
                .await
                .map_err(boxed_err)?;

            output
                .change_info()
                .map(ChangeInfo::from)
                .ok_or_else(missing_change_info)
        }

        async fn get_change(&self, change_id: &str) -> Result<ChangeInfo, Error> {
            let output = self
                .get_change()
                .id(change_id)
                .send()
                .await
                .map_err(boxed_err)?;

            output
                .change_info()
                .map(ChangeInfo::from)
                .ok_or_else(missing_change_info)
        }
    }

    #[cfg_attr(docsrs, doc(cfg(feature = "route53")))]
    impl Route53Controller<Client> {
        /// Create a controller using credentials and region from the environment
        pub async fn from_env<S: Into<String>>(hosted_zone_id: S) -> Self {
            let config = aws_config::load_from_env().await;
            Route53Controller::new(Client::new(&config), hosted_zone_id)
        }
    }
}
