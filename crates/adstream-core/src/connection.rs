use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use tracing::debug;

use crate::config::HandlerConfig;
use crate::error::AdError;

/// One bound LDAP connection. `handle()` hands out clones of the
/// underlying multiplexed handle, so subsearches share the socket;
/// `close()` unbinds and releases it.
pub struct AdConnection {
    ldap: Ldap,
}

impl AdConnection {
    pub(crate) async fn open(config: &HandlerConfig) -> Result<Self, AdError> {
        let settings =
            LdapConnSettings::new().set_conn_timeout(Duration::from_secs(config.timeout_secs));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(|e| AdError::ConnectionFailed(format!("{}: {e}", config.url)))?;
        ldap3::drive!(conn);

        let result = ldap
            .simple_bind(&config.user, &config.password)
            .await
            .map_err(AdError::Ldap)?;
        if result.rc != 0 {
            return Err(AdError::BindFailed(format!(
                "rc={}: {}",
                result.rc, result.text
            )));
        }
        debug!(url = %config.url, user = %config.user, "bound");
        Ok(Self { ldap })
    }

    /// A clone of the underlying handle; all clones share one socket.
    pub fn handle(&self) -> Ldap {
        self.ldap.clone()
    }

    /// Unbind and release the socket.
    pub async fn close(mut self) -> Result<(), AdError> {
        self.ldap.unbind().await.map_err(AdError::Ldap)
    }
}
