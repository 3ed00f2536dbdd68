use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, Scope, SearchEntry};
use tracing::debug;

use crate::error::AdError;
use crate::filter::{self, FilterExpr};

/// Expand the virtual in-chain membership attributes into flat `oneof`
/// expressions over real DNs. Only `equals`/`oneof` nodes on a virtual
/// attribute are touched; everything else is mapped structurally, so the
/// short-circuit shape of the original expression survives.
///
/// The original expression is compiled first so shape errors surface
/// before any search is issued. `ldap` is a handle on the outer search's
/// connection; expansion rounds run on it sequentially.
pub(crate) async fn expand(
    expr: &FilterExpr,
    ldap: Ldap,
    base: &str,
    boolean_attrs: &BTreeSet<String>,
    page_size: i32,
) -> Result<FilterExpr, AdError> {
    filter::compile(expr, boolean_attrs)?;
    if !contains_virtual(expr) {
        return Ok(expr.clone());
    }
    rewrite(expr, ldap, base, page_size).await
}

pub(crate) fn contains_virtual(expr: &FilterExpr) -> bool {
    let mut work = vec![expr];
    while let Some(node) = work.pop() {
        match node {
            FilterExpr::And(children) | FilterExpr::Or(children) => work.extend(children),
            FilterExpr::Not(inner) => work.push(inner),
            FilterExpr::Equals { attribute, .. } | FilterExpr::OneOf { attribute, .. } => {
                if filter::is_virtual_attribute(attribute) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn rewrite<'a>(
    expr: &'a FilterExpr,
    ldap: Ldap,
    base: &'a str,
    page_size: i32,
) -> Pin<Box<dyn Future<Output = Result<FilterExpr, AdError>> + Send + 'a>> {
    Box::pin(async move {
        match expr {
            FilterExpr::And(children) => {
                let mut out = Vec::with_capacity(children.len());
                for child in children {
                    out.push(rewrite(child, ldap.clone(), base, page_size).await?);
                }
                Ok(FilterExpr::And(out))
            }
            FilterExpr::Or(children) => {
                let mut out = Vec::with_capacity(children.len());
                for child in children {
                    out.push(rewrite(child, ldap.clone(), base, page_size).await?);
                }
                Ok(FilterExpr::Or(out))
            }
            FilterExpr::Not(inner) => Ok(FilterExpr::Not(Box::new(
                rewrite(inner, ldap, base, page_size).await?,
            ))),
            FilterExpr::Equals { attribute, value } if filter::is_virtual_attribute(attribute) => {
                expand_node(ldap, base, attribute, std::slice::from_ref(value), page_size).await
            }
            FilterExpr::OneOf { attribute, values } if filter::is_virtual_attribute(attribute) => {
                expand_node(ldap, base, attribute, values, page_size).await
            }
            other => Ok(other.clone()),
        }
    })
}

async fn expand_node(
    ldap: Ldap,
    base: &str,
    virtual_attribute: &str,
    initial: &[String],
    page_size: i32,
) -> Result<FilterExpr, AdError> {
    let real = filter::real_attribute(virtual_attribute);
    let expanded = expand_membership(ldap, base, real, initial, page_size).await?;
    Ok(FilterExpr::OneOf {
        attribute: real.to_string(),
        values: expanded,
    })
}

/// Breadth-first walk of the group membership graph, one search per
/// frontier, until a round discovers nothing new. The initial DNs stay in
/// the accumulated set, so direct matches keep matching; monotonic growth
/// over a finite group set guarantees termination.
async fn expand_membership(
    ldap: Ldap,
    base: &str,
    real_attribute: &str,
    initial: &[String],
    page_size: i32,
) -> Result<Vec<String>, AdError> {
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for dn in initial {
        if seen.insert(dn.clone()) {
            ordered.push(dn.clone());
        }
    }
    let mut frontier = ordered.clone();
    while !frontier.is_empty() {
        let compiled = frontier_filter(real_attribute, &frontier)?;
        let discovered = collect_dns(ldap.clone(), base, &compiled, page_size).await?;
        let mut next = Vec::new();
        for dn in discovered {
            if seen.insert(dn.clone()) {
                ordered.push(dn.clone());
                next.push(dn);
            }
        }
        debug!(
            attribute = real_attribute,
            discovered = next.len(),
            total = ordered.len(),
            "membership expansion round"
        );
        frontier = next;
    }
    Ok(ordered)
}

/// The per-round group search: groups whose membership attribute hits the
/// current frontier.
fn frontier_filter(real_attribute: &str, frontier: &[String]) -> Result<String, AdError> {
    let expr = FilterExpr::And(vec![
        FilterExpr::equals("objectClass", "group"),
        FilterExpr::equals("objectCategory", "group"),
        FilterExpr::OneOf {
            attribute: real_attribute.to_string(),
            values: frontier.to_vec(),
        },
    ]);
    filter::compile(&expr, &BTreeSet::new())
}

async fn collect_dns(
    mut ldap: Ldap,
    base: &str,
    filter: &str,
    page_size: i32,
) -> Result<Vec<String>, AdError> {
    let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
        Box::new(EntriesOnly::new()),
        Box::new(PagedResults::new(page_size)),
    ];
    let mut stream = ldap
        .streaming_search_with(
            adapters,
            base,
            Scope::Subtree,
            filter,
            vec!["distinguishedName".to_string()],
        )
        .await?;
    let mut dns = Vec::new();
    while let Some(entry) = stream.next().await? {
        dns.push(SearchEntry::construct(entry).dn);
    }
    let result = stream.finish().await;
    if !result.refs.is_empty() {
        return Err(AdError::Referral {
            refs: result.refs.clone(),
        });
    }
    result.success().map_err(AdError::from_ldap)?;
    Ok(dns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{TRANSITIVE_MEMBER, TRANSITIVE_MEMBER_OF};

    #[test]
    fn test_contains_virtual() {
        assert!(!contains_virtual(&FilterExpr::True));
        assert!(!contains_virtual(&FilterExpr::equals("memberOf", "x=y")));
        assert!(contains_virtual(&FilterExpr::equals(
            TRANSITIVE_MEMBER_OF,
            "CN=G,DC=example,DC=com"
        )));
        assert!(contains_virtual(&FilterExpr::And(vec![
            FilterExpr::has("cn"),
            FilterExpr::Not(Box::new(FilterExpr::one_of(
                TRANSITIVE_MEMBER,
                ["CN=G,DC=example,DC=com"]
            ))),
        ])));
    }

    #[test]
    fn test_frontier_filter_shape() {
        let compiled = frontier_filter(
            "memberOf",
            &[
                "CN=G,DC=example,DC=com".to_string(),
                "CN=H,DC=example,DC=com".to_string(),
            ],
        )
        .unwrap();
        assert_eq!(
            compiled,
            "(&(objectClass=group)(objectCategory=group)(|(memberOf=CN=G,DC=example,DC=com)(memberOf=CN=H,DC=example,DC=com)))"
        );
    }

    #[test]
    fn test_frontier_filter_single() {
        let compiled = frontier_filter("member", &["CN=G,DC=example,DC=com".to_string()]).unwrap();
        assert_eq!(
            compiled,
            "(&(objectClass=group)(objectCategory=group)(member=CN=G,DC=example,DC=com))"
        );
    }
}
