use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, Scope, SearchEntry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::connection::AdConnection;
use crate::error::AdError;
use crate::filter::{self, FilterExpr};
use crate::schema::{AttributeInfo, Schema};
use crate::value::{AdObject, AttributeValue, RawValue, Value};

pub(crate) const DISTINGUISHED_NAME: &str = "distinguishedName";

/// Pseudo-attributes some transports inject alongside real ones.
const IGNORED_ATTRIBUTES: [&str; 2] = ["dn", "controls"];

/// Trailing values re-requested with each ranged chunk and verified
/// against what is already accumulated.
const RANGE_OVERLAP: usize = 10;

/// Which attributes a search returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Select {
    /// Everything the server will hand out.
    #[default]
    All,
    /// An explicit list of attribute names.
    List(Vec<String>),
}

/// One search request. Unset fields fall back to the handler's
/// configuration: `base` to the domain base DN, `transitive` to the
/// configured default.
#[derive(Clone)]
pub struct SearchQuery {
    pub select: Select,
    pub base: Option<String>,
    pub filter: FilterExpr,
    pub scope: Scope,
    pub transitive: Option<bool>,
    /// When false, skip the schema bootstrap guard. The bootstrap
    /// self-search needs this; almost nothing else does.
    pub wait_for_init: bool,
    /// Run on this handle instead of a fresh connection. The caller keeps
    /// ownership; the driver will not unbind it.
    pub connection: Option<Ldap>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            select: Select::All,
            base: None,
            filter: FilterExpr::True,
            scope: Scope::Subtree,
            transitive: None,
            wait_for_init: true,
            connection: None,
        }
    }
}

impl SearchQuery {
    pub fn new(filter: FilterExpr) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn select(mut self, attributes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.select = Select::List(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn base(mut self, dn: impl Into<String>) -> Self {
        self.base = Some(dn.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn transitive(mut self, enabled: bool) -> Self {
        self.transitive = Some(enabled);
        self
    }

    pub fn on_connection(mut self, connection: &AdConnection) -> Self {
        self.connection = Some(connection.handle());
        self
    }
}

/// Everything the producer task needs to run one search.
pub(crate) struct SearchTask {
    pub base: String,
    pub scope: Scope,
    pub filter: String,
    pub wire_attrs: Vec<String>,
    /// `None` when the caller selected `*`; otherwise the set of names an
    /// entry may carry (the implicit distinguishedName included).
    pub selected: Option<BTreeSet<String>>,
    /// Whether distinguishedName stays in the output.
    pub keep_dn: bool,
    pub schema: Arc<Schema>,
    pub page_size: i32,
    pub queue_capacity: usize,
    /// Ranged-attribute completion is refused while the schema itself is
    /// being bootstrapped.
    pub allow_ranged: bool,
}

pub(crate) fn validate_select(select: &Select) -> Result<(), AdError> {
    if let Select::List(names) = select {
        if names.is_empty() {
            return Err(AdError::Query(
                "select list must name at least one attribute".into(),
            ));
        }
        for name in names {
            if !filter::is_virtual_attribute(name) && !filter::is_valid_attribute_name(name) {
                return Err(AdError::Query(format!(
                    "invalid attribute name {name:?} in select"
                )));
            }
        }
    }
    Ok(())
}

/// Turn a selection into the wire attribute list, the acceptance set for
/// returned entries, and whether distinguishedName stays in the output.
/// Virtual attributes never go on the wire; distinguishedName always does.
pub(crate) fn wire_attributes(select: &Select) -> (Vec<String>, Option<BTreeSet<String>>, bool) {
    match select {
        Select::All => (
            vec!["*".to_string(), DISTINGUISHED_NAME.to_string()],
            None,
            true,
        ),
        Select::List(names) => {
            let mut wire: BTreeSet<String> = names
                .iter()
                .filter(|name| !filter::is_virtual_attribute(name))
                .cloned()
                .collect();
            let keep_dn = wire.contains(DISTINGUISHED_NAME);
            wire.insert(DISTINGUISHED_NAME.to_string());
            (wire.iter().cloned().collect(), Some(wire), keep_dn)
        }
    }
}

/// Lazily yields normalized objects as the server pages them in.
///
/// Backpressure: the producer task parks once `queue_capacity` entries are
/// buffered, which also stops it polling the underlying paged search, so
/// the server is never asked for pages a slow consumer has not earned.
/// Dropping the stream mid-iteration tears the search down; an owned
/// connection is unbound by the producer on every exit path.
pub struct ObjectStream {
    rx: mpsc::Receiver<Result<AdObject, AdError>>,
}

impl ObjectStream {
    /// The next object, or `None` once the stream is exhausted. After an
    /// `Err` the stream ends.
    pub async fn next(&mut self) -> Option<Result<AdObject, AdError>> {
        self.rx.recv().await
    }

    /// Drain into a vector, giving up bounded memory.
    pub async fn collect(mut self) -> Result<Vec<AdObject>, AdError> {
        let mut objects = Vec::new();
        while let Some(item) = self.next().await {
            objects.push(item?);
        }
        Ok(objects)
    }

    /// The same items as a `futures` `Stream`.
    pub fn into_stream(self) -> ReceiverStream<Result<AdObject, AdError>> {
        ReceiverStream::new(self.rx)
    }
}

/// Launch the producer task and hand back its consuming end. `owned` is
/// the connection to unbind at teardown; `None` when the caller supplied
/// its own handle.
pub(crate) fn spawn_search(ldap: Ldap, owned: Option<AdConnection>, task: SearchTask) -> ObjectStream {
    let (tx, rx) = mpsc::channel(task.queue_capacity);
    tokio::spawn(run_search(ldap, owned, task, tx));
    ObjectStream { rx }
}

async fn run_search(
    mut ldap: Ldap,
    owned: Option<AdConnection>,
    task: SearchTask,
    tx: mpsc::Sender<Result<AdObject, AdError>>,
) {
    if let Err(e) = drive(&mut ldap, &task, &tx).await {
        let _ = tx.send(Err(e)).await;
    }
    if let Some(connection) = owned {
        if let Err(e) = connection.close().await {
            warn!(error = %e, "unbind after search failed");
        }
    }
}

async fn drive(
    ldap: &mut Ldap,
    task: &SearchTask,
    tx: &mpsc::Sender<Result<AdObject, AdError>>,
) -> Result<(), AdError> {
    // second handle on the same connection for range-completion subsearches
    let mut follow_up = ldap.clone();

    let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
        Box::new(EntriesOnly::new()),
        Box::new(PagedResults::new(task.page_size)),
    ];
    let mut stream = ldap
        .streaming_search_with(
            adapters,
            &task.base,
            task.scope,
            &task.filter,
            task.wire_attrs.clone(),
        )
        .await?;
    debug!(base = %task.base, filter = %task.filter, "search started");

    let mut yielded = 0usize;
    while let Some(entry) = stream.next().await? {
        let entry = SearchEntry::construct(entry);
        let object = match normalize_entry(entry, task, &mut follow_up).await {
            Ok(object) => object,
            Err(e) => {
                let _ = stream.finish().await;
                return Err(e);
            }
        };
        yielded += 1;
        if tx.send(Ok(object)).await.is_err() {
            debug!("consumer dropped mid-search, abandoning");
            let _ = stream.finish().await;
            return Ok(());
        }
    }

    let result = stream.finish().await;
    if !result.refs.is_empty() {
        return Err(AdError::Referral {
            refs: result.refs.clone(),
        });
    }
    let result = result.success().map_err(AdError::from_ldap)?;
    if !result.text.is_empty() {
        return Err(AdError::SearchFailed {
            rc: result.rc,
            text: result.text,
        });
    }
    debug!(count = yielded, "search finished");
    Ok(())
}

/// One attribute as pulled off the wire, before cardinality and decoding
/// checks.
struct PendingAttr {
    values: Vec<RawValue>,
    ranged: bool,
    complete: bool,
}

/// Split `attr;range=<from>-<to>` into the real name and the upper bound.
fn parse_range_marker(key: &str) -> Option<(&str, &str)> {
    let (name, options) = key.split_once(';')?;
    let range = options.strip_prefix("range=")?;
    let (_, to) = range.rsplit_once('-')?;
    Some((name, to))
}

/// Fold an entry's `attrs` and `bin_attrs` into per-attribute pending
/// values, dropping transport pseudo-attributes and flipping ranged
/// chunks (the server hands them over in reverse order).
fn collect_attributes(entry: SearchEntry) -> (String, BTreeMap<String, PendingAttr>) {
    let mut out: BTreeMap<String, PendingAttr> = BTreeMap::new();
    let text_values = entry
        .attrs
        .into_iter()
        .map(|(k, vs)| (k, vs.into_iter().map(RawValue::from_text).collect::<Vec<_>>()));
    let binary_values = entry.bin_attrs.into_iter().map(|(k, vs)| {
        (k, vs.into_iter().map(RawValue::from_bytes).collect::<Vec<_>>())
    });
    for (key, mut values) in text_values.chain(binary_values) {
        if IGNORED_ATTRIBUTES.contains(&key.as_str()) {
            continue;
        }
        let (name, range_to) = match parse_range_marker(&key) {
            Some((name, to)) => (name.to_string(), Some(to.to_string())),
            None => (key, None),
        };
        let slot = out.entry(name).or_insert_with(|| PendingAttr {
            values: Vec::new(),
            ranged: false,
            complete: true,
        });
        if let Some(to) = range_to {
            values.reverse();
            slot.ranged = true;
            slot.complete = to == "*";
        }
        slot.values.extend(values);
    }
    (entry.dn, out)
}

async fn normalize_entry(
    entry: SearchEntry,
    task: &SearchTask,
    follow_up: &mut Ldap,
) -> Result<AdObject, AdError> {
    let (dn, mut raw) = collect_attributes(entry);
    if raw.is_empty() {
        return Err(AdError::Entry {
            dn,
            reason: "no attributes returned; insufficient permissions or an unexpected empty entry"
                .into(),
        });
    }

    // finish ranged attributes before any shape checks
    let incomplete: Vec<String> = raw
        .iter()
        .filter(|(_, attr)| attr.ranged && !attr.complete)
        .map(|(name, _)| name.clone())
        .collect();
    for name in incomplete {
        if !task.allow_ranged {
            return Err(AdError::Entry {
                dn,
                reason: format!("ranged attribute {name:?} during schema bootstrap"),
            });
        }
        if let Some(attr) = raw.remove(&name) {
            let values = complete_range(follow_up, &dn, &name, attr.values).await?;
            raw.insert(
                name,
                PendingAttr {
                    values,
                    ranged: true,
                    complete: true,
                },
            );
        }
    }

    finish_object(dn, raw, task)
}

/// Apply selection, cardinality and decoding rules to a fully assembled
/// entry.
fn finish_object(
    dn: String,
    raw: BTreeMap<String, PendingAttr>,
    task: &SearchTask,
) -> Result<AdObject, AdError> {
    let mut object = AdObject::new();
    for (name, attr) in raw {
        if let Some(selected) = &task.selected {
            if !selected.contains(&name) {
                return Err(AdError::Entry {
                    dn,
                    reason: format!("attribute {name:?} was not selected"),
                });
            }
        }
        let Some(info) = task.schema.get(&name) else {
            return Err(AdError::Entry {
                dn,
                reason: format!("no cardinality information for attribute {name:?}"),
            });
        };
        let mut decoded = Vec::with_capacity(attr.values.len());
        for value in &attr.values {
            decoded.push(decode_value(&name, info, value)?);
        }
        let shaped = if info.single_valued {
            if decoded.len() > 1 {
                return Err(AdError::Entry {
                    dn,
                    reason: format!(
                        "single-valued attribute {name:?} returned {} values",
                        decoded.len()
                    ),
                });
            }
            match decoded.pop() {
                Some(value) => AttributeValue::Single(value),
                None => {
                    return Err(AdError::Entry {
                        dn,
                        reason: format!("single-valued attribute {name:?} returned no values"),
                    })
                }
            }
        } else {
            AttributeValue::Multiple(decoded)
        };
        object.insert(name, shaped);
    }
    if !task.keep_dn {
        object.remove(DISTINGUISHED_NAME);
    }
    Ok(object)
}

fn decode_value(attribute: &str, info: &AttributeInfo, value: &RawValue) -> Result<Value, AdError> {
    match info.decoder {
        Some(decoder) => decoder.decode(attribute, value),
        None => Ok(Value::Text(value.text.clone())),
    }
}

fn overlap_matches(accumulated: &[RawValue], offset: usize, chunk: &[RawValue]) -> bool {
    let overlap = accumulated.len() - offset;
    chunk.len() >= overlap && accumulated[offset..] == chunk[..overlap]
}

/// Fetch the remaining chunks of a ranged attribute from the entry's own
/// object on the same connection, re-reading a 10-value overlap each
/// round and verifying it byte-for-byte before splicing.
async fn complete_range(
    ldap: &mut Ldap,
    dn: &str,
    attribute: &str,
    mut accumulated: Vec<RawValue>,
) -> Result<Vec<RawValue>, AdError> {
    loop {
        let offset = accumulated.len().saturating_sub(RANGE_OVERLAP);
        let range_attr = format!("{attribute};range={offset}-*");
        // built directly: a DN may exceed the filter DSL's value length cap
        let mut dn_filter = String::with_capacity(dn.len() + 24);
        dn_filter.push('(');
        dn_filter.push_str(DISTINGUISHED_NAME);
        dn_filter.push('=');
        filter::escape_value(dn, &mut dn_filter);
        dn_filter.push(')');

        let (entries, _res) = ldap
            .search(
                dn,
                Scope::Subtree,
                &dn_filter,
                vec![DISTINGUISHED_NAME.to_string(), range_attr],
            )
            .await?
            .success()
            .map_err(AdError::from_ldap)?;
        let Some(entry) = entries.into_iter().next() else {
            return Err(AdError::Entry {
                dn: dn.to_string(),
                reason: format!("range completion for {attribute:?} returned no entry"),
            });
        };
        let (_, raw) = collect_attributes(SearchEntry::construct(entry));
        let Some((_, chunk)) = raw
            .into_iter()
            .find(|(name, attr)| name.as_str() == attribute && attr.ranged)
        else {
            return Err(AdError::Entry {
                dn: dn.to_string(),
                reason: format!("range completion for {attribute:?} returned no further chunk"),
            });
        };
        if !overlap_matches(&accumulated, offset, &chunk.values) {
            return Err(AdError::Entry {
                dn: dn.to_string(),
                reason: format!("range overlap mismatch while reassembling {attribute:?}"),
            });
        }
        let overlap = accumulated.len() - offset;
        if !chunk.complete && chunk.values.len() == overlap {
            return Err(AdError::Entry {
                dn: dn.to_string(),
                reason: format!("range completion for {attribute:?} made no progress"),
            });
        }
        accumulated.extend(chunk.values.into_iter().skip(overlap));
        debug!(
            attribute,
            total = accumulated.len(),
            complete = chunk.complete,
            "ranged attribute chunk appended"
        );
        if chunk.complete {
            return Ok(accumulated);
        }
    }
}
