use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dn;
use crate::error::AdError;
use crate::filter;
use crate::schema;

/// Handler construction options. Unknown keys are rejected when
/// deserializing from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerConfig {
    /// An `ldap://` or `ldaps://` URL.
    pub url: String,
    /// Bind user (a DN or `user@domain` name).
    pub user: String,
    pub password: String,
    /// Default search base.
    pub domain_base_dn: String,
    /// Where `attributeSchema` objects live, e.g.
    /// `CN=Schema,CN=Configuration,DC=example,DC=com`.
    pub schema_config_base_dn: String,
    /// Base DN for client-side transitive-membership expansion.
    /// Defaults to `domain_base_dn`.
    #[serde(default)]
    pub transitive_search_base_dn: Option<String>,
    /// Whether queries expand `_transitive_member`/`_transitive_memberOf`
    /// client-side unless they say otherwise.
    #[serde(default)]
    pub transitive_search_default: bool,
    /// Per-attribute cardinality overrides applied before bootstrap. An
    /// override must disagree with the directory schema; one that agrees
    /// is reported as stale. (This option was once called
    /// `is_single_valued`; the old key is rejected.)
    #[serde(default)]
    pub override_single_valued: BTreeMap<String, bool>,
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    /// Bound on entries buffered between the server and a slow consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_page_size() -> i32 {
    500
}
fn default_queue_capacity() -> usize {
    2000
}
fn default_timeout() -> u64 {
    30
}

impl HandlerConfig {
    /// A config with the required fields set and everything else at its
    /// default.
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        domain_base_dn: impl Into<String>,
        schema_config_base_dn: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            domain_base_dn: domain_base_dn.into(),
            schema_config_base_dn: schema_config_base_dn.into(),
            transitive_search_base_dn: None,
            transitive_search_default: false,
            override_single_valued: BTreeMap::new(),
            page_size: default_page_size(),
            queue_capacity: default_queue_capacity(),
            timeout_secs: default_timeout(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), AdError> {
        if !self.url.starts_with("ldap://") && !self.url.starts_with("ldaps://") {
            return Err(AdError::Config(format!(
                "url {:?} must be an ldap:// or ldaps:// URL",
                self.url
            )));
        }
        if self.user.is_empty() {
            return Err(AdError::Config("user must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(AdError::Config("password must not be empty".into()));
        }
        for (label, value) in [
            ("domain_base_dn", Some(&self.domain_base_dn)),
            ("schema_config_base_dn", Some(&self.schema_config_base_dn)),
            (
                "transitive_search_base_dn",
                self.transitive_search_base_dn.as_ref(),
            ),
        ] {
            if let Some(value) = value {
                if !dn::is_well_formed(value) {
                    return Err(AdError::Config(format!(
                        "{label} {value:?} is not a well-formed DN"
                    )));
                }
            }
        }
        for name in self.override_single_valued.keys() {
            if !filter::is_valid_attribute_name(name) {
                return Err(AdError::Config(format!(
                    "override_single_valued key {name:?} is not a valid attribute name"
                )));
            }
            if schema::is_bootstrap_only(name) {
                return Err(AdError::Config(format!(
                    "override_single_valued may not cover bootstrap attribute {name:?}"
                )));
            }
        }
        if self.page_size < 1 {
            return Err(AdError::Config("page_size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AdError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub(crate) fn transitive_base(&self) -> &str {
        self.transitive_search_base_dn
            .as_deref()
            .unwrap_or(&self.domain_base_dn)
    }
}
