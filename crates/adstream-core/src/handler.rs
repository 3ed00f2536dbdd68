use std::sync::Arc;
use std::time::{Duration, Instant};

use ldap3::{Ldap, Scope};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::HandlerConfig;
use crate::connection::AdConnection;
use crate::error::AdError;
use crate::filter::{self, FilterExpr};
use crate::schema::{self, Schema};
use crate::search::{self, ObjectStream, SearchQuery, SearchTask, Select};
use crate::transitive;
use crate::value::AdObject;

/// How long a failed bootstrap blocks further attempts.
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(10);

struct SchemaState {
    schema: Arc<Schema>,
    initialized: bool,
    last_attempt: Option<Instant>,
}

/// The public façade: validates configuration once, bootstraps the
/// attribute schema lazily on first search, and hands out lazily
/// streamed, schema-normalized results. Constructed once per directory
/// and shared for the life of the process.
pub struct AdHandler {
    config: HandlerConfig,
    state: RwLock<SchemaState>,
    bootstrap_gate: Mutex<()>,
}

impl AdHandler {
    pub fn new(config: HandlerConfig) -> Result<Self, AdError> {
        config.validate()?;
        let seeded = Arc::new(schema::seed_schema(&config.override_single_valued));
        Ok(Self {
            config,
            state: RwLock::new(SchemaState {
                schema: seeded,
                initialized: false,
                last_attempt: None,
            }),
            bootstrap_gate: Mutex::new(()),
        })
    }

    /// Open and bind a dedicated connection, for callers that want to run
    /// several searches over one socket. The caller is responsible for
    /// `close()`.
    pub async fn connect(&self) -> Result<AdConnection, AdError> {
        AdConnection::open(&self.config).await
    }

    /// Run a search and yield normalized objects lazily, one entry at a
    /// time, with bounded buffering between the server and the consumer.
    pub async fn get_objects(&self, query: SearchQuery) -> Result<ObjectStream, AdError> {
        if query.wait_for_init {
            self.ensure_initialized(query.connection.as_ref()).await?;
        }
        self.start_search(query, true).await
    }

    /// Run a search and materialize every result.
    pub async fn get_all_objects(&self, query: SearchQuery) -> Result<Vec<AdObject>, AdError> {
        self.get_objects(query).await?.collect().await
    }

    /// Run a search that must produce exactly one object. Zero results
    /// and more than one are both errors.
    pub async fn get_one_object(&self, query: SearchQuery) -> Result<AdObject, AdError> {
        let mut stream = self.get_objects(query).await?;
        let Some(first) = stream.next().await else {
            return Err(AdError::Query("expected exactly one object, found none".into()));
        };
        let first = first?;
        if let Some(second) = stream.next().await {
            second?;
            return Err(AdError::Query(
                "expected exactly one object, found more".into(),
            ));
        }
        Ok(first)
    }

    /// The schema currently in force (seeded until bootstrap completes).
    async fn schema_snapshot(&self) -> Arc<Schema> {
        self.state.read().await.schema.clone()
    }

    async fn start_search(
        &self,
        query: SearchQuery,
        allow_ranged: bool,
    ) -> Result<ObjectStream, AdError> {
        search::validate_select(&query.select)?;
        let schema = self.schema_snapshot().await;
        let (ldap, owned) = match &query.connection {
            Some(handle) => (handle.clone(), None),
            None => {
                let connection = AdConnection::open(&self.config).await?;
                (connection.handle(), Some(connection))
            }
        };
        // from here on an owned connection must be released on every path
        match self.prepare_task(&query, &schema, &ldap, allow_ranged).await {
            Ok(task) => Ok(search::spawn_search(ldap, owned, task)),
            Err(e) => {
                if let Some(connection) = owned {
                    let _ = connection.close().await;
                }
                Err(e)
            }
        }
    }

    async fn prepare_task(
        &self,
        query: &SearchQuery,
        schema: &Arc<Schema>,
        ldap: &Ldap,
        allow_ranged: bool,
    ) -> Result<SearchTask, AdError> {
        let transitive_on = query
            .transitive
            .unwrap_or(self.config.transitive_search_default);
        let filter_string = if transitive_on {
            let rewritten = transitive::expand(
                &query.filter,
                ldap.clone(),
                self.config.transitive_base(),
                schema.boolean_attributes(),
                self.config.page_size,
            )
            .await?;
            filter::compile(&rewritten, schema.boolean_attributes())?
        } else {
            filter::compile(&query.filter, schema.boolean_attributes())?
        };
        let (wire_attrs, selected, keep_dn) = search::wire_attributes(&query.select);
        Ok(SearchTask {
            base: query
                .base
                .clone()
                .unwrap_or_else(|| self.config.domain_base_dn.clone()),
            scope: query.scope,
            filter: filter_string,
            wire_attrs,
            selected,
            keep_dn,
            schema: schema.clone(),
            page_size: self.config.page_size,
            queue_capacity: self.config.queue_capacity,
            allow_ranged,
        })
    }

    /// Single-flight schema bootstrap. Overlapping callers coalesce on
    /// the gate; within the retry window after a failure, callers fail
    /// fast instead of hammering the directory.
    async fn ensure_initialized(&self, connection: Option<&Ldap>) -> Result<(), AdError> {
        if self.state.read().await.initialized {
            return Ok(());
        }
        let _gate = self.bootstrap_gate.lock().await;
        {
            let state = self.state.read().await;
            if state.initialized {
                return Ok(());
            }
            if let Some(at) = state.last_attempt {
                if at.elapsed() < BOOTSTRAP_RETRY_INTERVAL {
                    return Err(AdError::Schema(format!(
                        "schema bootstrap failed {}s ago; retrying at most once per {}s",
                        at.elapsed().as_secs(),
                        BOOTSTRAP_RETRY_INTERVAL.as_secs()
                    )));
                }
            }
        }
        self.state.write().await.last_attempt = Some(Instant::now());
        info!("bootstrapping attribute schema");
        let schema = self.bootstrap(connection).await?;
        let mut state = self.state.write().await;
        state.schema = Arc::new(schema);
        state.initialized = true;
        info!("attribute schema ready");
        Ok(())
    }

    /// The self-search over the schema configuration naming context. Runs
    /// with the seeded schema and with ranged completion disabled.
    async fn bootstrap(&self, connection: Option<&Ldap>) -> Result<Schema, AdError> {
        let query = SearchQuery {
            select: Select::List(
                schema::BOOTSTRAP_SELECT
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            base: Some(self.config.schema_config_base_dn.clone()),
            filter: FilterExpr::equals("objectClass", "attributeSchema"),
            scope: Scope::Subtree,
            transitive: Some(false),
            wait_for_init: false,
            connection: connection.cloned(),
        };
        let rows = self.start_search(query, false).await?.collect().await?;
        debug!(rows = rows.len(), "schema rows fetched");
        schema::apply_schema_rows(&rows, &self.config.override_single_valued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> HandlerConfig {
        HandlerConfig::new(
            "ldap://dc01.example.com",
            "svc-search@example.com",
            "hunter2",
            "DC=example,DC=com",
            "CN=Schema,CN=Configuration,DC=example,DC=com",
        )
    }

    #[test]
    fn test_construction_validates() {
        assert!(AdHandler::new(valid_config()).is_ok());
        let mut config = valid_config();
        config.domain_base_dn = "nonsense".to_string();
        assert!(AdHandler::new(config).is_err());
    }

    #[tokio::test]
    async fn test_seeded_schema_before_bootstrap() {
        let mut config = valid_config();
        config
            .override_single_valued
            .insert("proxyAddresses".to_string(), false);
        let handler = AdHandler::new(config).unwrap();
        let schema = handler.schema_snapshot().await;
        assert!(schema.get("lDAPDisplayName").unwrap().single_valued);
        assert!(!schema.get("proxyAddresses").unwrap().single_valued);
        assert!(schema.get("member").is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_throttle_window() {
        let handler = AdHandler::new(valid_config()).unwrap();
        handler.state.write().await.last_attempt = Some(Instant::now());
        let err = handler.ensure_initialized(None).await.unwrap_err();
        assert!(err.to_string().contains("bootstrap"), "got: {err}");
    }

    #[tokio::test]
    async fn test_initialized_skips_bootstrap() {
        let handler = AdHandler::new(valid_config()).unwrap();
        handler.state.write().await.initialized = true;
        assert!(handler.ensure_initialized(None).await.is_ok());
    }
}
