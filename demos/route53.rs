// You'll need the route53 feature enabled, plus AWS credentials and a region in the environment
use dns01cert::{
    deserialize_account, dns::route53::Route53Controller, key, perform_dns01, register_account,
    serialize_account, Directory, Environment,
};
use std::path::Path;
use tokio::fs;

const ACCOUNT_FILE: &str = "account.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let domain = std::env::var("DOMAIN")?;
    let hosted_zone_id = std::env::var("HOSTED_ZONE_ID")?;
    let staging = std::env::var("PRODUCTION").is_err();

    let directory = Directory::from_environment(Environment::from_staging(staging))
        .build()
        .await?;

    // Reuse the account between runs so renewals don't create a new one every time
    let account = if Path::new(ACCOUNT_FILE).exists() {
        let data = fs::read(ACCOUNT_FILE).await?;
        deserialize_account(&directory, &data).await?
    } else {
        let account = register_account(&directory, "hello@example.com", true).await?;
        fs::write(ACCOUNT_FILE, serialize_account(&account)?).await?;
        account
    };

    let private_key = key::make_key()?;
    let csr = key::make_csr(&private_key, &[domain.as_str()], false)?;

    let dns = Route53Controller::from_env(hosted_zone_id).await;
    let chain = perform_dns01(&directory, &account, &domain, &csr, &dns).await?;

    fs::write("privkey.pem", private_key).await?;
    fs::write("fullchain.pem", chain).await?;

    Ok(())
}
