//! Subject pattern matching — single-token `*` and multi-token suffix `>`.
//!
//! Shared by Wind, River, and Humus, all of which route dot-separated
//! subjects against subscriber patterns the same way the broker does.

/// Returns true if `subject` matches `pattern`.
///
/// `*` matches exactly one dot-separated token; `>` matches one or more
/// trailing tokens and is only meaningful as the final token of a pattern.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut p = pattern_tokens.iter();
    let mut s = subject_tokens.iter();

    loop {
        match (p.next(), s.next()) {
            (Some(&">"), Some(_)) => return true,
            (Some(&">"), None) => return false,
            (Some(&"*"), Some(_)) => continue,
            (Some(&"*"), None) => return false,
            (Some(pt), Some(st)) => {
                if pt != st {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

/// Builds the reserved River ingress subject `river.<source>.<suffix>`.
pub fn river_subject(source: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("river.{source}")
    } else {
        format!("river.{source}.{suffix}")
    }
}

/// Builds the reserved Humus subject `humus.<nim>`.
pub fn humus_subject(nim: &str) -> String {
    format!("humus.{nim}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_wildcard() {
        assert!(matches("a.*.c", "a.x.c"));
        assert!(!matches("a.*.c", "a.c"));
        assert!(!matches("a.*.c", "a.x.y.c"));
    }

    #[test]
    fn multi_token_wildcard() {
        assert!(matches("a.>", "a.x"));
        assert!(matches("a.>", "a.x.y"));
        assert!(matches("a.>", "a.x.y.z"));
        assert!(!matches("a.>", "a"));
        assert!(!matches("a.>", "b.x"));
    }

    #[test]
    fn exact_match() {
        assert!(matches("payment.completed", "payment.completed"));
        assert!(!matches("payment.completed", "payment.failed"));
    }

    #[test]
    fn river_and_humus_namespaces() {
        assert_eq!(river_subject("stripe", "webhook"), "river.stripe.webhook");
        assert_eq!(humus_subject("payment-nim"), "humus.payment-nim");
        assert!(matches("river.>", &river_subject("stripe", "webhook")));
    }
}
