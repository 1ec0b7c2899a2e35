//! LDAP attribute-description syntax checks

use once_cell::sync::Lazy;
use regex::Regex;

/// `descr`: a letter followed by letters, digits or hyphens
static KEYSTRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("keystring pattern compiles"));

/// `numericoid`: no leading zeros, first arc non-zero
static NUMERIC_OID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9][0-9]*(\.(0|[1-9][0-9]*))+$").expect("numeric OID pattern compiles")
});

pub fn is_valid_attribute_name(name: &str) -> bool {
    KEYSTRING.is_match(name) || NUMERIC_OID.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystrings() {
        for name in ["cn", "sAMAccountName", "msDS-ResultantPSO", "my-user-cn", "x1"] {
            assert!(is_valid_attribute_name(name), "{} should be valid", name);
        }
        for name in ["", "1cn", "-cn", "user name", "cn;range=0-*", "mail@x", "cn_x"] {
            assert!(!is_valid_attribute_name(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_patterns_compile() {
        assert!(KEYSTRING.is_match("uid"));
        assert!(NUMERIC_OID.is_match("2.9"));
    }

    #[test]
    fn test_numeric_oids() {
        for oid in ["2.5.4.3", "1.2.840.113556.1.4.1941", "1.0.3"] {
            assert!(is_valid_attribute_name(oid), "{} should be valid", oid);
        }
        for oid in ["0.9.2342", "2.05.4", "2..4", "2.5.", "7"] {
            assert!(!is_valid_attribute_name(oid), "{} should be invalid", oid);
        }
    }
}
