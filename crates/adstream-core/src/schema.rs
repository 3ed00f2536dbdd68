use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::AdError;
use crate::value::{AdObject, AttributeValue, Decoder, Value};

/// Cardinality and decoding knowledge for one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub single_valued: bool,
    pub decoder: Option<Decoder>,
    pub boolean: bool,
}

/// The attribute schema learned at bootstrap. Written once, then shared
/// read-only behind an `Arc` for the lifetime of the handler.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attributes: BTreeMap<String, AttributeInfo>,
    booleans: BTreeSet<String>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.get(name)
    }

    /// Names with Boolean attribute syntax, for filter validation.
    pub fn boolean_attributes(&self) -> &BTreeSet<String> {
        &self.booleans
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// The attributes the bootstrap self-search selects. They may not appear
/// in `override_single_valued`.
pub(crate) const BOOTSTRAP_SELECT: [&str; 3] =
    ["lDAPDisplayName", "attributeSyntax", "isSingleValued"];

/// Attributes seeded as single-valued before the schema is known, so the
/// bootstrap search itself can be normalized. The directory must agree.
const SEEDED_SINGLE_VALUED: [&str; 4] = [
    "distinguishedName",
    "lDAPDisplayName",
    "attributeSyntax",
    "isSingleValued",
];

/// Large-integer attributes that hold Windows NT filetimes; their
/// attributeSyntax alone cannot tell them apart from plain integers.
const FILETIME_ATTRIBUTES: [&str; 3] = ["accountExpires", "badPasswordTime", "lastLogonTimestamp"];

const SYNTAX_BOOLEAN: &str = "2.5.5.8";
const SYNTAX_OCTET_STRING: &str = "2.5.5.10";

/// Syntax OIDs whose values pass through undecoded.
const PASSTHROUGH_SYNTAXES: [&str; 10] = [
    "2.5.5.1", "2.5.5.2", "2.5.5.4", "2.5.5.5", "2.5.5.6", "2.5.5.7", "2.5.5.12", "2.5.5.13",
    "2.5.5.14", "2.5.5.16",
];

pub(crate) fn is_bootstrap_only(name: &str) -> bool {
    BOOTSTRAP_SELECT.contains(&name)
}

/// The schema in force before bootstrap: the seeded single-valued
/// attributes plus the caller's cardinality overrides.
pub(crate) fn seed_schema(overrides: &BTreeMap<String, bool>) -> Schema {
    let mut schema = Schema::default();
    for name in SEEDED_SINGLE_VALUED {
        schema.attributes.insert(
            name.to_string(),
            AttributeInfo {
                single_valued: true,
                decoder: None,
                boolean: false,
            },
        );
    }
    for (name, &single_valued) in overrides {
        schema.attributes.insert(
            name.clone(),
            AttributeInfo {
                single_valued,
                decoder: None,
                boolean: false,
            },
        );
    }
    schema
}

/// Fold bootstrap rows into a fresh schema map. `overrides` win over the
/// directory when they deliberately disagree with it; an override that
/// agrees is reported so stale configuration gets cleaned up.
pub(crate) fn apply_schema_rows(
    rows: &[AdObject],
    overrides: &BTreeMap<String, bool>,
) -> Result<Schema, AdError> {
    let mut schema = seed_schema(overrides);
    for row in rows {
        let Some(name) = single_text(row, "lDAPDisplayName") else {
            warn!("schema row without lDAPDisplayName, skipped");
            continue;
        };
        let name = name.to_string();
        let single_valued = match row.get("isSingleValued") {
            Some(AttributeValue::Single(Value::Text(t))) if t == "TRUE" => true,
            Some(AttributeValue::Single(Value::Text(t))) if t == "FALSE" => false,
            Some(AttributeValue::Single(Value::Bool(b))) => *b,
            _ => {
                return Err(AdError::Schema(format!(
                    "schema row for {name:?} has no usable isSingleValued"
                )))
            }
        };
        let syntax = single_text(row, "attributeSyntax").map(str::to_string);
        let boolean = syntax.as_deref() == Some(SYNTAX_BOOLEAN);
        let decoder = assign_decoder(&name, syntax.as_deref());

        match schema.attributes.get_mut(&name) {
            Some(existing) => {
                if SEEDED_SINGLE_VALUED.contains(&name.as_str()) {
                    if !single_valued {
                        return Err(AdError::Schema(format!(
                            "bootstrap attribute {name:?} must be single-valued"
                        )));
                    }
                } else if let Some(&overridden) = overrides.get(&name) {
                    if overridden == single_valued {
                        return Err(AdError::Schema(format!(
                            "override_single_valued for {name:?} matches the directory schema; remove it"
                        )));
                    }
                    debug!(attribute = %name, "keeping deliberate single-valued override");
                } else {
                    return Err(AdError::Schema(format!("duplicate schema row for {name:?}")));
                }
                // cardinality stays as seeded/overridden
                existing.decoder = decoder;
                existing.boolean = boolean;
            }
            None => {
                schema.attributes.insert(
                    name.clone(),
                    AttributeInfo {
                        single_valued,
                        decoder,
                        boolean,
                    },
                );
            }
        }
        if boolean {
            schema.booleans.insert(name);
        }
    }

    match schema.attributes.get("member") {
        None => {
            return Err(AdError::Schema(
                "attribute \"member\" is missing from the directory schema".into(),
            ))
        }
        Some(info) if info.single_valued => {
            return Err(AdError::Schema(
                "attribute \"member\" must be multi-valued".into(),
            ))
        }
        _ => {}
    }
    for name in [
        "attributeSyntax",
        "distinguishedName",
        "lDAPDisplayName",
        "member",
        "objectClass",
    ] {
        if schema.booleans.contains(name) {
            return Err(AdError::Schema(format!(
                "attribute {name:?} cannot have Boolean syntax"
            )));
        }
    }

    debug!(
        attributes = schema.attributes.len(),
        booleans = schema.booleans.len(),
        "schema map built"
    );
    Ok(schema)
}

fn assign_decoder(name: &str, syntax: Option<&str>) -> Option<Decoder> {
    if FILETIME_ATTRIBUTES.contains(&name) {
        return Some(Decoder::NtFileTime);
    }
    match syntax {
        Some(SYNTAX_BOOLEAN) => Some(Decoder::Boolean),
        Some("2.5.5.9") => Some(Decoder::Int32),
        Some("2.5.5.11") => Some(Decoder::GeneralizedTime),
        Some("2.5.5.15") => Some(Decoder::OctetString),
        Some("2.5.5.17") => Some(Decoder::Sid),
        Some(SYNTAX_OCTET_STRING) => {
            if name.ends_with("GUID") || name.ends_with("Guid") {
                Some(Decoder::Guid)
            } else {
                Some(Decoder::OctetString)
            }
        }
        Some(other) if PASSTHROUGH_SYNTAXES.contains(&other) => None,
        Some(other) => {
            warn!(
                attribute = name,
                syntax = other,
                "unknown attribute syntax, values pass through undecoded"
            );
            None
        }
        None => {
            warn!(attribute = name, "schema row without attributeSyntax");
            None
        }
    }
}

fn single_text<'a>(row: &'a AdObject, attribute: &str) -> Option<&'a str> {
    match row.get(attribute) {
        Some(AttributeValue::Single(Value::Text(t))) => Some(t.as_str()),
        _ => None,
    }
}
