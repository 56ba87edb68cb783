//! Distinguished name handling.
//!
//! DNs are compared in their normalized form: lowercase, with the whitespace
//! that follows each comma removed. No escaping is supported.

/// The attributes a DN component may be named by.
const NAMING_ATTRIBUTES: [&str; 4] = ["cn", "uid", "ou", "dc"];

pub fn normalize(dn: &str) -> String {
    let lowercase = dn.to_lowercase();
    let mut components = lowercase.split(',');
    let mut normalized = components.next().unwrap_or_default().to_string();
    for component in components {
        normalized.push(',');
        normalized.push_str(component.trim_start());
    }
    normalized
}

/// Whether every comma separated component is `attr=value` with a known
/// naming attribute. The empty DN is not well formed.
pub fn is_well_formed(dn: &str) -> bool {
    !dn.is_empty()
        && dn.split(',').all(|component| match component.split_once('=') {
            Some((attribute, _)) => NAMING_ATTRIBUTES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(attribute.trim())),
            None => false,
        })
}

/// Splits the first component off: `cn=bob,ou=users,dc=x` gives
/// `("cn", "bob", "ou=users,dc=x")`. Missing parts come back empty.
pub fn split_head(dn: &str) -> (&str, &str, &str) {
    let (head, rest) = dn.split_once(',').unwrap_or((dn, ""));
    let (attribute, value) = head.split_once('=').unwrap_or((head, ""));
    (attribute, value, rest)
}

/// Whether the normalized `dn` is `base` itself or sits anywhere below it.
pub fn is_within(dn: &str, base: &str) -> bool {
    if base.is_empty() {
        return true;
    }
    dn == base
        || dn
            .strip_suffix(base)
            .is_some_and(|prefix| prefix.ends_with(','))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("CN=Bob, ou=Users,  DC=Example,dc=com"),
            "cn=bob,ou=users,dc=example,dc=com"
        );
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_only_touches_whitespace_after_commas() {
        assert_eq!(normalize(" CN=bob,\t ou=users"), " cn=bob,ou=users");
        assert_eq!(normalize("cn=Bob Smith ,dc=com"), "cn=bob smith ,dc=com");
        let once = normalize("  DC=Test, dc=EXAMPLE,  dc=com");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("cn=bob,ou=users,dc=example,dc=com"));
        assert!(is_well_formed("uid=bob,ou=users,dc=example,dc=com"));
        assert!(is_well_formed("dc=com"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("cn=bob,,dc=com"));
        assert!(!is_well_formed("bob,dc=com"));
        assert!(!is_well_formed("o=company,dc=com"));
    }

    #[test]
    fn test_split_head() {
        assert_eq!(
            split_head("cn=bob,ou=users,dc=com"),
            ("cn", "bob", "ou=users,dc=com")
        );
        assert_eq!(split_head("dc=com"), ("dc", "com", ""));
        assert_eq!(split_head("bob"), ("bob", "", ""));
    }

    #[test]
    fn test_is_within() {
        let base = "dc=example,dc=com";
        assert!(is_within("dc=example,dc=com", base));
        assert!(is_within("cn=bob,ou=users,dc=example,dc=com", base));
        assert!(!is_within("dc=badexample,dc=com", base));
        assert!(!is_within("dc=com", base));
        assert!(is_within("anything", ""));
    }
}
