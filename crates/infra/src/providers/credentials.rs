//! Credential reference resolution
//!
//! Integrations store a reference, never the secret. A reference is either
//! `env:NAME` (the variable holds the credentials JSON) or `file:PATH` (the
//! file holds it).

use std::fmt;
use std::path::PathBuf;

use ledgerlink_domain::{LedgerLinkError, Result};
use serde::Deserialize;

/// Secrets needed to talk to one provider account
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub access_token: String,
    pub webhook_signing_key: String,
    /// Overrides the provider's production API host
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Shopify store domain, e.g. `example.myshopify.com`
    #[serde(default)]
    pub shop_domain: Option<String>,
}

// Secrets stay out of logs
impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_token", &"<redacted>")
            .field("webhook_signing_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("shop_domain", &self.shop_domain)
            .finish()
    }
}

/// Parsed credential reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    Env(String),
    File(PathBuf),
}

impl CredentialRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix("env:").filter(|n| !n.is_empty()) {
            return Ok(Self::Env(name.to_string()));
        }
        if let Some(path) = raw.strip_prefix("file:").filter(|p| !p.is_empty()) {
            return Ok(Self::File(PathBuf::from(path)));
        }
        Err(LedgerLinkError::validation(format!(
            "credential reference must be env:NAME or file:PATH, got '{raw}'"
        )))
    }
}

/// Resolve `credential_ref` into provider credentials
///
/// An unresolvable reference is reported as an authentication failure so that
/// the integration waits for reconfiguration instead of retrying.
pub fn resolve_credentials(credential_ref: &str) -> Result<ProviderCredentials> {
    let reference = CredentialRef::parse(credential_ref)?;
    let raw = match &reference {
        CredentialRef::Env(name) => std::env::var(name).map_err(|_| {
            LedgerLinkError::Authentication(format!("credential variable {name} is not set"))
        })?,
        CredentialRef::File(path) => std::fs::read_to_string(path).map_err(|e| {
            LedgerLinkError::Authentication(format!(
                "credential file {} is unreadable: {e}",
                path.display()
            ))
        })?,
    };

    let credentials: ProviderCredentials = serde_json::from_str(&raw).map_err(|e| {
        LedgerLinkError::Authentication(format!("credentials behind {credential_ref} are malformed: {e}"))
    })?;
    if credentials.access_token.trim().is_empty() {
        return Err(LedgerLinkError::Authentication(format!(
            "credentials behind {credential_ref} have an empty access token"
        )));
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parses_reference_forms() {
        assert_eq!(CredentialRef::parse("env:SQ").expect("env"), CredentialRef::Env("SQ".into()));
        assert_eq!(
            CredentialRef::parse(" file:/etc/ll/sq.json ").expect("file"),
            CredentialRef::File(PathBuf::from("/etc/ll/sq.json"))
        );
        assert!(CredentialRef::parse("plain-secret").is_err());
        assert!(CredentialRef::parse("env:").is_err());
    }

    #[test]
    fn resolves_file_reference() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"access_token":"sq-secret-123","webhook_signing_key":"whsec-456","shop_domain":"demo.myshopify.com"}}"#
        )
        .expect("written");

        let creds = resolve_credentials(&format!("file:{}", file.path().display())).expect("resolved");
        assert_eq!(creds.access_token, "sq-secret-123");
        assert_eq!(creds.shop_domain.as_deref(), Some("demo.myshopify.com"));

        let debug = format!("{creds:?}");
        assert!(!debug.contains("sq-secret-123"));
        assert!(!debug.contains("whsec-456"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn missing_secret_is_authentication_failure() {
        let err = resolve_credentials("env:LEDGERLINK_TEST_SURELY_UNSET_CREDENTIAL").expect_err("unset");
        assert!(matches!(err, LedgerLinkError::Authentication(_)));

        let err = resolve_credentials("file:/nonexistent/ledgerlink/creds.json").expect_err("missing");
        assert!(matches!(err, LedgerLinkError::Authentication(_)));
    }
}
