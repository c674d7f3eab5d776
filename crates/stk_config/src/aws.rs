//! Cloud account settings and the credential seam.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::value::to_plain_string;

/// A client bound to a service, region and profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceClient {
    pub service: String,
    pub region: String,
    pub profile: Option<String>,
}

/// Resolves the caller identity and hands out service clients.
pub trait CredentialProvider: Send + Sync {
    /// Account the active credentials belong to; must be stable for a run.
    fn account_id(&self, profile: Option<&str>) -> anyhow::Result<String>;

    fn client_for(
        &self,
        service: &str,
        region: &str,
        profile: Option<&str>,
    ) -> anyhow::Result<ServiceClient> {
        Ok(ServiceClient {
            service: service.to_string(),
            region: region.to_string(),
            profile: profile.map(String::from),
        })
    }
}

/// The `aws` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsSettings {
    pub region: String,
    pub cfn_bucket: String,
    #[serde(default, deserialize_with = "stringly")]
    pub account_id: Option<String>,
    #[serde(default, deserialize_with = "stringly")]
    pub profile: Option<String>,
}

/// Account ids are digits, so YAML hands them back as numbers.
fn stringly<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_null()).map(|v| to_plain_string(&v)))
}

impl AwsSettings {
    /// Check the active credentials against the declared account and record it.
    pub fn verify_account(&mut self, credentials: &dyn CredentialProvider) -> ConfigResult<&str> {
        let actual = credentials
            .account_id(self.profile.as_deref())
            .map_err(|e| ConfigError::Credentials(format!("{:#}", e)))?;

        if let Some(expected) = &self.account_id {
            if expected != &actual {
                return Err(ConfigError::AccountMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        info!("using account {} in {}", actual, self.region);
        Ok(self.account_id.insert(actual).as_str())
    }

    pub fn client(
        &self,
        credentials: &dyn CredentialProvider,
        service: &str,
    ) -> ConfigResult<ServiceClient> {
        info!(
            "client({}), account_id={}",
            service,
            self.account_id.as_deref().unwrap_or("?")
        );
        credentials
            .client_for(service, &self.region, self.profile.as_deref())
            .map_err(|e| ConfigError::Credentials(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::StaticCredentials;
    use serde_json::json;

    fn settings(value: Value) -> AwsSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_numeric_account_id() {
        let aws = settings(json!({"region": "eu-west-1", "cfn_bucket": "b", "account_id": 123456789012u64}));
        assert_eq!(aws.account_id.as_deref(), Some("123456789012"));
        assert_eq!(aws.profile, None);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<AwsSettings, _> =
            serde_json::from_value(json!({"region": "r", "cfn_bucket": "b", "regoin": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_account_recorded() {
        let credentials = StaticCredentials::new("111122223333");

        let mut aws = settings(json!({"region": "eu-west-1", "cfn_bucket": "b"}));
        assert_eq!(aws.verify_account(&credentials).unwrap(), "111122223333");
        assert_eq!(aws.account_id.as_deref(), Some("111122223333"));
    }

    #[test]
    fn test_account_mismatch() {
        let credentials = StaticCredentials::new("999999999999");

        let mut aws = settings(json!({"region": "eu-west-1", "cfn_bucket": "b", "account_id": "111122223333"}));
        let err = aws.verify_account(&credentials).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incorrect AWS Account - expected 111122223333, but appear to be using 999999999999"
        );
    }

    #[test]
    fn test_profile_passed_to_provider() {
        let credentials = StaticCredentials::new("1").with_profile("deploy");

        let mut aws = settings(json!({"region": "r", "cfn_bucket": "b", "profile": "deploy"}));
        assert!(aws.verify_account(&credentials).is_ok());

        let mut other = settings(json!({"region": "r", "cfn_bucket": "b", "profile": "admin"}));
        assert!(matches!(
            other.verify_account(&credentials).unwrap_err(),
            ConfigError::Credentials(_)
        ));
    }

    #[test]
    fn test_client_binds_region_and_profile() {
        let credentials = StaticCredentials::new("1");
        let aws = settings(json!({"region": "eu-west-1", "cfn_bucket": "b", "profile": "deploy"}));

        let client = aws.client(&credentials, "cloudformation").unwrap();
        assert_eq!(client.region, "eu-west-1");
        assert_eq!(client.profile.as_deref(), Some("deploy"));
    }
}
