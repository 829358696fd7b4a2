//! Account balance seeding
//!
//! Before trading, every session's account is credited with each currency its
//! orders can touch: one `POST` per (token, currency) against the exchange's
//! account service.

use crate::config::BenchConfig;
use crate::core::ApiToken;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

const BALANCES_PATH: &str = "/private/account/user/balances";

/// Distinct currencies referenced by `pairs` (`BTC_EUR` → `BTC`, `EUR`)
pub fn currencies<S: AsRef<str>>(pairs: &[S]) -> BTreeSet<String> {
    pairs
        .iter()
        .flat_map(|pair| pair.as_ref().split('_'))
        .map(str::trim)
        .filter(|currency| !currency.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct AccountSeeder {
    client: reqwest::Client,
    base_url: String,
    amount: u64,
}

impl AccountSeeder {
    pub fn new(
        base_url: impl Into<String>,
        amount: u64,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client for seeding")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            amount,
        })
    }

    pub fn from_config(config: &BenchConfig) -> Result<Self> {
        Self::new(
            config.exchange.http_base_url(),
            config.seeding.amount,
            config.exchange.tls.accept_invalid_certs,
        )
    }

    pub fn seed_url(&self, token: ApiToken, currency: &str) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.base_url, BALANCES_PATH, token, currency, self.amount
        )
    }

    pub async fn seed(&self, token: ApiToken, currency: &str) -> Result<()> {
        let url = self.seed_url(token, currency);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("Seeding request failed: POST {}", url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Seeding rejected with {}: POST {}", status, url);
        }
        debug!(%token, currency, "balance seeded");
        Ok(())
    }

    /// Seed every currency for every token, stopping at the first failure
    ///
    /// Returns the number of requests made.
    pub async fn seed_all(
        &self,
        tokens: &[ApiToken],
        currencies: &BTreeSet<String>,
    ) -> Result<usize> {
        let mut requests = 0;
        for token in tokens {
            for currency in currencies {
                self.seed(*token, currency).await?;
                requests += 1;
            }
        }
        info!(accounts = tokens.len(), currencies = currencies.len(), requests, "accounts seeded");
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currencies() {
        let pairs = ["BTC_USDT", "BTC_CHF", "BTC_EUR", "BTC_USDC"];
        let found: Vec<String> = currencies(&pairs).into_iter().collect();
        assert_eq!(found, vec!["BTC", "CHF", "EUR", "USDC", "USDT"]);
    }

    #[test]
    fn test_currencies_ignores_blanks() {
        assert_eq!(currencies(&["ETH_", "ETH"]).len(), 1);
        assert!(currencies::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_seed_url() {
        let seeder = AccountSeeder::new("http://10.0.0.5:8888", 100_000_000, false).unwrap();
        assert_eq!(
            seeder.seed_url(ApiToken(3002), "EUR"),
            "http://10.0.0.5:8888/private/account/user/balances/3002/EUR/100000000"
        );
    }
}
