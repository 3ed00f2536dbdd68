use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("search failed with rc={rc}: {text}")]
    SearchFailed { rc: u32, text: String },

    #[error("unhandled referral: {refs:?}")]
    Referral { refs: Vec<String> },

    #[error("invalid entry {dn}: {reason}")]
    Entry { dn: String, reason: String },

    #[error("cannot decode {attribute} value {value:?}: {reason}")]
    Decode {
        attribute: String,
        value: String,
        reason: String,
    },

    #[error("ldap error: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

impl AdError {
    /// Surface the server's rc and diagnostic text when the underlying
    /// error wraps an LDAP result.
    pub(crate) fn from_ldap(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => AdError::SearchFailed {
                rc: result.rc,
                text: result.text,
            },
            other => AdError::Ldap(other),
        }
    }
}
