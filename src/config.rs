//! Process configuration.
//!
//! All settings come from CLI flags with environment fallbacks, with `.env`
//! loaded at startup. The recipient address is validated against the
//! configured network before the server accepts traffic: a testnet recipient
//! on mainnet would make every challenge unpayable.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use url::Url;

use crate::network::StacksNetwork;
use crate::stacks::{decode_address, is_mainnet_version};

#[derive(Parser, Debug, Clone)]
#[command(name = "x402-stacks-gateway")]
#[command(about = "x402 payment-gated API gateway for Stacks")]
pub struct Config {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Bind port.
    #[arg(long, env = "PORT", default_value_t = 8402)]
    pub port: u16,

    /// Stacks network this gateway settles on.
    #[arg(long, env = "STACKS_NETWORK", default_value = "testnet")]
    pub network: StacksNetwork,

    /// Recipient address for all payments.
    #[arg(long, env = "PAY_TO")]
    pub pay_to: String,

    /// Base URL of the settlement relay.
    #[arg(long, env = "FACILITATOR_URL")]
    pub facilitator_url: Url,

    /// Public base URL of this gateway, used in challenges and discovery.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<Url>,

    /// Directory holding per-payer shard databases.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// OpenRouter API key for dynamic-priced inference.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    /// Cloudflare Workers AI account id.
    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    pub cloudflare_account_id: Option<String>,

    /// Cloudflare Workers AI API key.
    #[arg(long, env = "CLOUDFLARE_API_KEY", hide_env_values = true)]
    pub cloudflare_api_key: Option<String>,

    /// Stacks node API root; defaults per network.
    #[arg(long, env = "STACKS_API_URL")]
    pub stacks_api_url: Option<Url>,

    /// Embedding service root (OpenAI-compatible). Optional.
    #[arg(long, env = "EMBEDDINGS_URL")]
    pub embeddings_url: Option<Url>,

    /// Embedding service API key.
    #[arg(long, env = "EMBEDDINGS_API_KEY", hide_env_values = true)]
    pub embeddings_api_key: Option<String>,

    /// Structured-log sink endpoint. Optional.
    #[arg(long, env = "LOG_SINK_URL")]
    pub log_sink_url: Option<Url>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid recipient address {address}: {reason}")]
    InvalidRecipient { address: String, reason: String },
    #[error("recipient {address} belongs to the wrong network for {network}")]
    RecipientNetworkMismatch {
        address: String,
        network: StacksNetwork,
    },
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (version, _) =
            decode_address(&self.pay_to).map_err(|e| ConfigError::InvalidRecipient {
                address: self.pay_to.clone(),
                reason: e.to_string(),
            })?;
        let mainnet = matches!(self.network, StacksNetwork::Mainnet);
        if is_mainnet_version(version) != mainnet {
            return Err(ConfigError::RecipientNetworkMismatch {
                address: self.pay_to.clone(),
                network: self.network,
            });
        }
        Ok(())
    }

    /// Public base URL, defaulting to the bind address.
    pub fn public_base_url(&self) -> Url {
        self.base_url.clone().unwrap_or_else(|| {
            Url::parse(&format!("http://localhost:{}/", self.port))
                .unwrap_or_else(|_| Url::parse("http://localhost/").unwrap())
        })
    }

    /// Stacks node API root, defaulting per network.
    pub fn stacks_api_root(&self) -> Url {
        self.stacks_api_url.clone().unwrap_or_else(|| {
            Url::parse(self.network.default_api_url())
                .unwrap_or_else(|_| Url::parse("https://api.hiro.so").unwrap())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(network: &str, pay_to: &str) -> Config {
        Config::parse_from([
            "x402-stacks-gateway",
            "--network",
            network,
            "--pay-to",
            pay_to,
            "--facilitator-url",
            "https://relay.example/",
        ])
    }

    #[test]
    fn accepts_a_matching_recipient() {
        let mainnet = config("mainnet", "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7");
        assert!(mainnet.validate().is_ok());
        let testnet = config("testnet", "ST2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKQYAC0RQ");
        assert!(testnet.validate().is_ok());
    }

    #[test]
    fn rejects_cross_network_recipients() {
        let config = config("mainnet", "ST2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKQYAC0RQ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RecipientNetworkMismatch { .. })
        ));
    }

    #[test]
    fn rejects_garbage_recipients() {
        let config = config("mainnet", "not-an-address");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRecipient { .. })
        ));
    }
}
