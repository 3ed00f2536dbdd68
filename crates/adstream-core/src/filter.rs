use std::collections::BTreeSet;
use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AdError;

/// Virtual attribute matching objects that are in-chain members of a group.
pub const TRANSITIVE_MEMBER: &str = "_transitive_member";
/// Virtual attribute matching groups an object is an in-chain member of.
pub const TRANSITIVE_MEMBER_OF: &str = "_transitive_memberOf";

/// LDAP_MATCHING_RULE_IN_CHAIN. Used for the server-side rendering of the
/// virtual attributes when client-side expansion is off; evaluating it on
/// the server is correct but notoriously slow on large directories.
const IN_CHAIN_OID: &str = "1.2.840.113556.1.4.1941";

/// A search filter expression. Compiles to an RFC 2254 filter string via
/// [`compile`]; parses from (and serializes to) the tagged-sequence form
/// `["and", ["equals", "cn", "jdoe"], …]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Equals { attribute: String, value: String },
    BeginsWith { attribute: String, value: String },
    EndsWith { attribute: String, value: String },
    Contains { attribute: String, value: String },
    Has { attribute: String },
    OneOf { attribute: String, values: Vec<String> },
    True,
    False,
}

impl FilterExpr {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn begins_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::BeginsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn ends_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::EndsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn contains(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        FilterExpr::Contains {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn has(attribute: impl Into<String>) -> Self {
        FilterExpr::Has {
            attribute: attribute.into(),
        }
    }

    pub fn one_of(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        FilterExpr::OneOf {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not(inner: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(inner))
    }
}

/// Whether a name is one of the two virtual in-chain membership attributes.
pub fn is_virtual_attribute(name: &str) -> bool {
    name == TRANSITIVE_MEMBER || name == TRANSITIVE_MEMBER_OF
}

/// The real attribute a virtual one expands over.
pub(crate) fn real_attribute(virtual_name: &str) -> &'static str {
    if virtual_name == TRANSITIVE_MEMBER {
        "member"
    } else {
        "memberOf"
    }
}

/// An attribute name: 2-60 characters, a leading lowercase ASCII letter,
/// then ASCII letters, digits or `-`.
pub fn is_valid_attribute_name(name: &str) -> bool {
    if name.len() < 2 || name.len() > 60 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn check_attribute(name: &str, virtual_ok: bool) -> Result<(), AdError> {
    if is_virtual_attribute(name) {
        if virtual_ok {
            return Ok(());
        }
        return Err(AdError::Filter(format!(
            "virtual attribute {name:?} is only valid in equals and oneof"
        )));
    }
    if !is_valid_attribute_name(name) {
        return Err(AdError::Filter(format!("invalid attribute name {name:?}")));
    }
    Ok(())
}

fn check_value(attribute: &str, value: &str) -> Result<(), AdError> {
    let len = value.chars().count();
    if len == 0 || len > 255 {
        return Err(AdError::Filter(format!(
            "value for {attribute:?} must be 1-255 characters, got {len}"
        )));
    }
    Ok(())
}

fn check_boolean_equals(
    attribute: &str,
    value: &str,
    booleans: &BTreeSet<String>,
) -> Result<(), AdError> {
    if booleans.contains(attribute) && value != "TRUE" && value != "FALSE" {
        return Err(AdError::Filter(format!(
            "boolean attribute {attribute:?} only matches the literal values \"TRUE\" and \"FALSE\""
        )));
    }
    Ok(())
}

fn check_not_boolean(
    attribute: &str,
    booleans: &BTreeSet<String>,
    operation: &str,
) -> Result<(), AdError> {
    if booleans.contains(attribute) {
        return Err(AdError::Filter(format!(
            "{operation} cannot be applied to boolean attribute {attribute:?}"
        )));
    }
    Ok(())
}

/// RFC 2254 escaping for filter values. Only `*`, `(`, `)`, `\` and NUL
/// are rewritten; everything else, multibyte UTF-8 included, passes
/// through unchanged.
pub fn escape_value(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
}

enum Step<'a> {
    Node(&'a FilterExpr),
    Close,
}

/// Validate `expr` and emit its RFC 2254 wire form. `boolean_attrs` is
/// the set of attributes with Boolean syntax, which constrain the values
/// and operators allowed on them.
///
/// The walk uses an explicit work list into one output buffer, so deeply
/// nested expressions compile without growing the call stack.
pub fn compile(expr: &FilterExpr, boolean_attrs: &BTreeSet<String>) -> Result<String, AdError> {
    let mut out = String::new();
    let mut work = vec![Step::Node(expr)];
    while let Some(step) = work.pop() {
        match step {
            Step::Close => out.push(')'),
            Step::Node(node) => emit_node(node, boolean_attrs, &mut out, &mut work)?,
        }
    }
    Ok(out)
}

fn emit_node<'a>(
    node: &'a FilterExpr,
    booleans: &BTreeSet<String>,
    out: &mut String,
    work: &mut Vec<Step<'a>>,
) -> Result<(), AdError> {
    match node {
        FilterExpr::And(children) | FilterExpr::Or(children) => {
            let (op, tag) = if matches!(node, FilterExpr::And(_)) {
                ('&', "and")
            } else {
                ('|', "or")
            };
            match children.len() {
                0 => {
                    return Err(AdError::Filter(format!(
                        "{tag} requires at least one subexpression"
                    )))
                }
                // a single operand stands for itself, ungrouped
                1 => work.push(Step::Node(&children[0])),
                _ => {
                    out.push('(');
                    out.push(op);
                    work.push(Step::Close);
                    for child in children.iter().rev() {
                        work.push(Step::Node(child));
                    }
                }
            }
        }
        FilterExpr::Not(inner) => {
            out.push_str("(!");
            work.push(Step::Close);
            work.push(Step::Node(inner));
        }
        FilterExpr::Equals { attribute, value } => {
            check_attribute(attribute, true)?;
            check_value(attribute, value)?;
            check_boolean_equals(attribute, value, booleans)?;
            if is_virtual_attribute(attribute) {
                emit_in_chain(out, attribute, value);
            } else {
                emit_simple(out, attribute, "", value, "");
            }
        }
        FilterExpr::BeginsWith { attribute, value } => {
            check_attribute(attribute, false)?;
            check_value(attribute, value)?;
            check_not_boolean(attribute, booleans, "beginswith")?;
            emit_simple(out, attribute, "", value, "*");
        }
        FilterExpr::EndsWith { attribute, value } => {
            check_attribute(attribute, false)?;
            check_value(attribute, value)?;
            check_not_boolean(attribute, booleans, "endswith")?;
            emit_simple(out, attribute, "*", value, "");
        }
        FilterExpr::Contains { attribute, value } => {
            check_attribute(attribute, false)?;
            check_value(attribute, value)?;
            check_not_boolean(attribute, booleans, "contains")?;
            emit_simple(out, attribute, "*", value, "*");
        }
        FilterExpr::Has { attribute } => {
            check_attribute(attribute, false)?;
            out.push('(');
            out.push_str(attribute);
            out.push_str("=*)");
        }
        FilterExpr::OneOf { attribute, values } => {
            check_attribute(attribute, true)?;
            for value in values {
                check_value(attribute, value)?;
                check_boolean_equals(attribute, value, booleans)?;
            }
            if values.is_empty() {
                // matching one of nothing matches nothing
                out.push_str("(!(objectClass=*))");
            } else {
                let grouped = values.len() > 1;
                if grouped {
                    out.push_str("(|");
                }
                for value in values {
                    if is_virtual_attribute(attribute) {
                        emit_in_chain(out, attribute, value);
                    } else {
                        emit_simple(out, attribute, "", value, "");
                    }
                }
                if grouped {
                    out.push(')');
                }
            }
        }
        FilterExpr::True => out.push_str("(objectClass=*)"),
        FilterExpr::False => out.push_str("(!(objectClass=*))"),
    }
    Ok(())
}

fn emit_simple(out: &mut String, attribute: &str, prefix: &str, value: &str, suffix: &str) {
    out.push('(');
    out.push_str(attribute);
    out.push('=');
    out.push_str(prefix);
    escape_value(value, out);
    out.push_str(suffix);
    out.push(')');
}

fn emit_in_chain(out: &mut String, virtual_name: &str, value: &str) {
    out.push('(');
    out.push_str(real_attribute(virtual_name));
    out.push(':');
    out.push_str(IN_CHAIN_OID);
    out.push_str(":=");
    escape_value(value, out);
    out.push(')');
}

impl Serialize for FilterExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                let tag = if matches!(self, FilterExpr::And(_)) {
                    "and"
                } else {
                    "or"
                };
                let mut seq = serializer.serialize_seq(Some(children.len() + 1))?;
                seq.serialize_element(tag)?;
                for child in children {
                    seq.serialize_element(child)?;
                }
                seq.end()
            }
            FilterExpr::Not(inner) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("not")?;
                seq.serialize_element(inner.as_ref())?;
                seq.end()
            }
            FilterExpr::Equals { attribute, value } => serialize_binary(serializer, "equals", attribute, value),
            FilterExpr::BeginsWith { attribute, value } => {
                serialize_binary(serializer, "beginswith", attribute, value)
            }
            FilterExpr::EndsWith { attribute, value } => {
                serialize_binary(serializer, "endswith", attribute, value)
            }
            FilterExpr::Contains { attribute, value } => {
                serialize_binary(serializer, "contains", attribute, value)
            }
            FilterExpr::Has { attribute } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("has")?;
                seq.serialize_element(attribute)?;
                seq.end()
            }
            FilterExpr::OneOf { attribute, values } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("oneof")?;
                seq.serialize_element(attribute)?;
                seq.serialize_element(values)?;
                seq.end()
            }
            FilterExpr::True => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element("true")?;
                seq.end()
            }
            FilterExpr::False => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element("false")?;
                seq.end()
            }
        }
    }
}

fn serialize_binary<S: Serializer>(
    serializer: S,
    tag: &str,
    attribute: &str,
    value: &str,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(3))?;
    seq.serialize_element(tag)?;
    seq.serialize_element(attribute)?;
    seq.serialize_element(value)?;
    seq.end()
}

impl<'de> Deserialize<'de> for FilterExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(ExprVisitor)
    }
}

struct ExprVisitor;

impl<'de> Visitor<'de> for ExprVisitor {
    type Value = FilterExpr;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a filter expression: a sequence led by a tag string")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<FilterExpr, A::Error> {
        let tag: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::custom("empty filter expression"))?;
        match tag.as_str() {
            "and" | "or" => {
                let mut children = Vec::new();
                while let Some(child) = seq.next_element::<FilterExpr>()? {
                    children.push(child);
                }
                Ok(if tag == "and" {
                    FilterExpr::And(children)
                } else {
                    FilterExpr::Or(children)
                })
            }
            "not" => {
                let inner: FilterExpr = required(&mut seq, "not", "a subexpression")?;
                end(&mut seq, "not")?;
                Ok(FilterExpr::Not(Box::new(inner)))
            }
            "equals" | "beginswith" | "endswith" | "contains" => {
                let attribute: String = required(&mut seq, &tag, "an attribute name")?;
                let value: String = required(&mut seq, &tag, "a value")?;
                end(&mut seq, &tag)?;
                Ok(match tag.as_str() {
                    "equals" => FilterExpr::Equals { attribute, value },
                    "beginswith" => FilterExpr::BeginsWith { attribute, value },
                    "endswith" => FilterExpr::EndsWith { attribute, value },
                    _ => FilterExpr::Contains { attribute, value },
                })
            }
            "has" => {
                let attribute: String = required(&mut seq, "has", "an attribute name")?;
                end(&mut seq, "has")?;
                Ok(FilterExpr::Has { attribute })
            }
            "oneof" => {
                let attribute: String = required(&mut seq, "oneof", "an attribute name")?;
                let values: Vec<String> = required(&mut seq, "oneof", "a list of values")?;
                end(&mut seq, "oneof")?;
                Ok(FilterExpr::OneOf { attribute, values })
            }
            "true" => {
                end(&mut seq, "true")?;
                Ok(FilterExpr::True)
            }
            "false" => {
                end(&mut seq, "false")?;
                Ok(FilterExpr::False)
            }
            other => Err(de::Error::custom(format!("unknown filter tag {other:?}"))),
        }
    }
}

fn required<'de, A: SeqAccess<'de>, T: Deserialize<'de>>(
    seq: &mut A,
    tag: &str,
    what: &str,
) -> Result<T, A::Error> {
    seq.next_element()?
        .ok_or_else(|| de::Error::custom(format!("{tag} requires {what}")))
}

fn end<'de, A: SeqAccess<'de>>(seq: &mut A, tag: &str) -> Result<(), A::Error> {
    if seq.next_element::<de::IgnoredAny>()?.is_some() {
        return Err(de::Error::custom(format!("too many elements for {tag}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_booleans() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn booleans(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equals_escaping() {
        let expr = FilterExpr::equals("cn", "lkj*(");
        assert_eq!(compile(&expr, &no_booleans()).unwrap(), "(cn=lkj\\2a\\28)");
    }

    #[test]
    fn test_and_of_two() {
        let expr = FilterExpr::And(vec![
            FilterExpr::equals("cn", "lkj*("),
            FilterExpr::begins_with("cn", "lkj*("),
        ]);
        assert_eq!(
            compile(&expr, &no_booleans()).unwrap(),
            "(&(cn=lkj\\2a\\28)(cn=lkj\\2a\\28*))"
        );
    }

    #[test]
    fn test_special_characters_pass_through() {
        let expr = FilterExpr::equals("name", "[]{}<>()=*\u{0}\\ÅÄÖåäö");
        assert_eq!(
            compile(&expr, &no_booleans()).unwrap(),
            "(name=[]{}<>\\28\\29=\\2a\\00\\5cÅÄÖåäö)"
        );
    }

    #[test]
    fn test_nested_mixed() {
        let expr = FilterExpr::Or(vec![
            FilterExpr::not(FilterExpr::contains("name", "Qwer")),
            FilterExpr::And(vec![
                FilterExpr::And(vec![
                    FilterExpr::has("cn"),
                    FilterExpr::And(vec![
                        FilterExpr::contains("displayName", "Qwer)( /\""),
                        FilterExpr::And(vec![
                            FilterExpr::begins_with("name", "_A"),
                            FilterExpr::ends_with("givenName", "P.)"),
                        ]),
                    ]),
                ]),
                FilterExpr::not(FilterExpr::has("uid")),
            ]),
        ]);
        assert_eq!(
            compile(&expr, &no_booleans()).unwrap(),
            "(|(!(name=*Qwer*))(&(&(cn=*)(&(displayName=*Qwer\\29\\28 /\"*)(&(name=_A*)(givenName=*P.\\29))))(!(uid=*))))"
        );
    }

    #[test]
    fn test_true_false() {
        assert_eq!(
            compile(&FilterExpr::True, &no_booleans()).unwrap(),
            "(objectClass=*)"
        );
        assert_eq!(
            compile(&FilterExpr::False, &no_booleans()).unwrap(),
            "(!(objectClass=*))"
        );
    }

    #[test]
    fn test_oneof_empty_is_false() {
        let expr = FilterExpr::one_of("abc", Vec::<String>::new());
        assert_eq!(
            compile(&expr, &no_booleans()).unwrap(),
            "(!(objectClass=*))"
        );
    }

    #[test]
    fn test_oneof_matches_or_of_equals() {
        let oneof = FilterExpr::one_of("cn", ["a1", "b2", "c3"]);
        let or = FilterExpr::Or(vec![
            FilterExpr::equals("cn", "a1"),
            FilterExpr::equals("cn", "b2"),
            FilterExpr::equals("cn", "c3"),
        ]);
        assert_eq!(
            compile(&oneof, &no_booleans()).unwrap(),
            compile(&or, &no_booleans()).unwrap()
        );

        let single = FilterExpr::one_of("cn", ["only"]);
        assert_eq!(compile(&single, &no_booleans()).unwrap(), "(cn=only)");
    }

    #[test]
    fn test_single_operand_collapses() {
        let inner = FilterExpr::equals("cn", "x9");
        let and = FilterExpr::And(vec![inner.clone()]);
        let or = FilterExpr::Or(vec![inner.clone()]);
        let direct = compile(&inner, &no_booleans()).unwrap();
        assert_eq!(compile(&and, &no_booleans()).unwrap(), direct);
        assert_eq!(compile(&or, &no_booleans()).unwrap(), direct);
    }

    #[test]
    fn test_compile_does_not_mutate() {
        let expr = FilterExpr::And(vec![
            FilterExpr::equals("cn", "a*"),
            FilterExpr::one_of("sn", ["x)", "y("]),
        ]);
        let before = expr.clone();
        compile(&expr, &no_booleans()).unwrap();
        assert_eq!(expr, before);
    }

    #[test]
    fn test_wide_and_compiles_iteratively() {
        let operands: Vec<FilterExpr> = (0..1usize << 14)
            .map(|i| FilterExpr::equals("cn", format!("user{i}")))
            .collect();
        let compiled = compile(&FilterExpr::And(operands), &no_booleans()).unwrap();
        assert!(compiled.starts_with("(&(cn=user0)(cn=user1)"));
        assert!(compiled.ends_with("(cn=user16383))"));
        assert!(compiled.len() > (1 << 14) * 9);
    }

    #[test]
    fn test_deep_balanced_tree_compiles() {
        fn balanced(depth: usize) -> FilterExpr {
            if depth == 0 {
                FilterExpr::equals("cn", "leaf")
            } else {
                FilterExpr::And(vec![balanced(depth - 1), balanced(depth - 1)])
            }
        }
        let compiled = compile(&balanced(14), &no_booleans()).unwrap();
        // 2^14 leaves, each "(cn=leaf)"
        assert_eq!(compiled.matches("(cn=leaf)").count(), 1 << 14);
        assert!(compiled.starts_with("(&(&"));
    }

    #[test]
    fn test_empty_and_or_rejected() {
        assert!(compile(&FilterExpr::And(vec![]), &no_booleans()).is_err());
        assert!(compile(&FilterExpr::Or(vec![]), &no_booleans()).is_err());
    }

    #[test]
    fn test_bad_attribute_names_rejected() {
        for name in [
            "Abc",   // uppercase start
            "a",     // too short
            "_abc",  // leading underscore on a non-virtual name
            "ab c",  // space
            "aö",    // non-ASCII
            &"a".repeat(61),
        ] {
            let expr = FilterExpr::equals(name, "d1");
            assert!(
                compile(&expr, &no_booleans()).is_err(),
                "attribute {name:?} should be rejected"
            );
        }
        let longest = format!("a{}", "b".repeat(59));
        assert!(compile(&FilterExpr::equals(longest, "d1"), &no_booleans()).is_ok());
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(compile(&FilterExpr::equals("cn", ""), &no_booleans()).is_err());
        assert!(compile(&FilterExpr::equals("cn", "x".repeat(256)), &no_booleans()).is_err());
        assert!(compile(&FilterExpr::equals("cn", "x".repeat(255)), &no_booleans()).is_ok());
        // the limit counts characters, not bytes
        assert!(compile(&FilterExpr::equals("cn", "Å".repeat(255)), &no_booleans()).is_ok());
    }

    #[test]
    fn test_boolean_attribute_rules() {
        let bools = booleans(&["enabledFlag"]);
        assert_eq!(
            compile(&FilterExpr::equals("enabledFlag", "TRUE"), &bools).unwrap(),
            "(enabledFlag=TRUE)"
        );
        assert!(compile(&FilterExpr::equals("enabledFlag", "true"), &bools).is_err());
        assert!(compile(&FilterExpr::contains("enabledFlag", "TRUE"), &bools).is_err());
        assert!(compile(&FilterExpr::begins_with("enabledFlag", "TRUE"), &bools).is_err());
        assert!(compile(&FilterExpr::one_of("enabledFlag", ["TRUE", "yes"]), &bools).is_err());
        assert!(compile(&FilterExpr::one_of("enabledFlag", ["TRUE", "FALSE"]), &bools).is_ok());
        // presence tests stay legal on booleans
        assert!(compile(&FilterExpr::has("enabledFlag"), &bools).is_ok());
    }

    #[test]
    fn test_virtual_attribute_positions() {
        let dn = "CN=Admins,DC=example,DC=com";
        assert_eq!(
            compile(&FilterExpr::equals(TRANSITIVE_MEMBER_OF, dn), &no_booleans()).unwrap(),
            format!("(memberOf:1.2.840.113556.1.4.1941:={dn})")
        );
        assert_eq!(
            compile(&FilterExpr::equals(TRANSITIVE_MEMBER, dn), &no_booleans()).unwrap(),
            format!("(member:1.2.840.113556.1.4.1941:={dn})")
        );
        assert!(compile(&FilterExpr::has(TRANSITIVE_MEMBER), &no_booleans()).is_err());
        assert!(compile(&FilterExpr::contains(TRANSITIVE_MEMBER_OF, "x"), &no_booleans()).is_err());
        let oneof = FilterExpr::one_of(TRANSITIVE_MEMBER_OF, [dn, "CN=Ops,DC=example,DC=com"]);
        assert_eq!(
            compile(&oneof, &no_booleans()).unwrap(),
            format!(
                "(|(memberOf:1.2.840.113556.1.4.1941:={dn})(memberOf:1.2.840.113556.1.4.1941:=CN=Ops,DC=example,DC=com))"
            )
        );
    }

    #[test]
    fn test_tagged_sequence_round_trip() {
        let expr = FilterExpr::And(vec![
            FilterExpr::equals("cn", "jdoe"),
            FilterExpr::not(FilterExpr::one_of("sn", ["a1", "b2"])),
            FilterExpr::True,
        ]);
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(
            json,
            r#"["and",["equals","cn","jdoe"],["not",["oneof","sn",["a1","b2"]]],["true"]]"#
        );
        let parsed: FilterExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, expr);
    }

    #[test]
    fn test_tagged_sequence_shape_errors() {
        for bad in [
            r#"["not"]"#,
            r#"["not",["true"],["true"]]"#,
            r#"["equals","cn"]"#,
            r#"["oneof","a","b"]"#,
            r#"["frobnicate","a","b"]"#,
            r#"[]"#,
            r#"["true","x"]"#,
        ] {
            assert!(
                serde_json::from_str::<FilterExpr>(bad).is_err(),
                "{bad} should not parse"
            );
        }
    }
}
