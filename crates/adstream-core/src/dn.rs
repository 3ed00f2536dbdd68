/// Check that a string looks like a well-formed DN: one or more
/// `type=value` components separated by unescaped commas. This is a
/// shape check for catching configuration typos, not a full RFC 4514
/// parse; the server remains the authority on DN validity.
pub fn is_well_formed(dn: &str) -> bool {
    if dn.trim().is_empty() {
        return false;
    }
    split_components(dn).iter().all(|c| is_component(c))
}

/// Split on commas, honoring backslash escapes.
fn split_components(dn: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in dn.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            ',' => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn is_component(component: &str) -> bool {
    let Some((attr, value)) = component.split_once('=') else {
        return false;
    };
    let attr = attr.trim();
    !attr.is_empty()
        && attr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("DC=example,DC=com"));
        assert!(is_well_formed("CN=Users,DC=example,DC=com"));
        assert!(is_well_formed("cn=a b c,ou=x"));
    }

    #[test]
    fn test_empty() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("   "));
    }

    #[test]
    fn test_missing_value() {
        assert!(!is_well_formed("DC="));
        assert!(!is_well_formed("DC=example,DC="));
    }

    #[test]
    fn test_missing_attribute() {
        assert!(!is_well_formed("=example"));
        assert!(!is_well_formed("example"));
    }

    #[test]
    fn test_bad_attribute_chars() {
        assert!(!is_well_formed("D C=example"));
        assert!(!is_well_formed("d(c=example"));
    }

    #[test]
    fn test_escaped_comma_in_value() {
        assert!(is_well_formed("CN=Smith\\, John,DC=example,DC=com"));
    }

    #[test]
    fn test_trailing_comma() {
        assert!(!is_well_formed("DC=example,"));
    }
}
