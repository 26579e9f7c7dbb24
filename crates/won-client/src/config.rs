//! Client configuration.

use won_process::RetryPolicy;
use won_protocol::Uri;

use crate::error::{Error, Result};

const DEFAULT_NODE_URI: &str = "https://localhost:8443/won/resource";
const DEFAULT_OWNER_BASE_URL: &str = "https://localhost:8082/owner";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base of minted event URIs.
    pub node_uri: String,
    /// Base URL of the owner application (agreement endpoint).
    pub owner_base_url: String,
    /// Bound on mirror chains followed while resolving agreement events.
    pub agreement_max_depth: usize,
    /// Consecutive sub-resource failures after which reloads stop.
    pub sub_resource_max_failures: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_uri: DEFAULT_NODE_URI.to_string(),
            owner_base_url: DEFAULT_OWNER_BASE_URL.to_string(),
            agreement_max_depth: won_agreement::DEFAULT_MAX_DEPTH,
            sub_resource_max_failures: RetryPolicy::default().max_failures,
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let node_uri = lookup("WON_NODE_URI").unwrap_or(defaults.node_uri);
        let owner_base_url = lookup("WON_OWNER_BASE_URL").unwrap_or(defaults.owner_base_url);

        let agreement_max_depth = match lookup("WON_AGREEMENT_MAX_DEPTH") {
            Some(v) => parse_positive("WON_AGREEMENT_MAX_DEPTH", &v)?,
            None => defaults.agreement_max_depth,
        };
        let sub_resource_max_failures = match lookup("WON_SUB_RESOURCE_MAX_FAILURES") {
            Some(v) => parse_positive("WON_SUB_RESOURCE_MAX_FAILURES", &v)?,
            None => defaults.sub_resource_max_failures,
        };

        Ok(Self {
            node_uri,
            owner_base_url,
            agreement_max_depth,
            sub_resource_max_failures,
        })
    }

    #[must_use]
    pub fn with_node_uri(mut self, node_uri: impl Into<String>) -> Self {
        self.node_uri = node_uri.into();
        self
    }

    #[must_use]
    pub fn with_owner_base_url(mut self, url: impl Into<String>) -> Self {
        self.owner_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_agreement_max_depth(mut self, depth: usize) -> Self {
        self.agreement_max_depth = depth;
        self
    }

    #[must_use]
    pub fn with_sub_resource_max_failures(mut self, max: u32) -> Self {
        self.sub_resource_max_failures = max;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_failures: self.sub_resource_max_failures,
        }
    }

    /// URL of the agreement-protocol query for a connection.
    pub fn agreement_protocol_url(&self, connection: &Uri) -> String {
        format!(
            "{}/rest/agreement/getAgreementProtocolUris?connectionUri={}",
            self.owner_base_url.trim_end_matches('/'),
            urlencoding::encode(connection.as_str())
        )
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(Error::Config(format!("{key} must be a positive integer, got {value:?}"))),
    }
}
