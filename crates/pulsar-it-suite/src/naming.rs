//! Random names for clusters, namespaces and topics.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Namespace used by [`generate_topic_name`].
pub const DEFAULT_NAMESPACE: &str = "default";

/// Returns `len` random lowercase ASCII letters.
pub fn random_name(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Returns `ns-` followed by eight random letters.
pub fn generate_namespace_name() -> String {
    format!("ns-{}", random_name(8))
}

/// Returns a unique topic name in the `public/default` namespace.
pub fn generate_topic_name(prefix: &str, persistent: bool) -> String {
    generate_topic_name_in(DEFAULT_NAMESPACE, prefix, persistent)
}

/// Returns a unique topic name in `public/<namespace>`.
///
/// ```
/// use pulsar_it_suite::naming::generate_topic_name_in;
///
/// let topic = generate_topic_name_in("ns1", "orders", true);
/// assert!(topic.starts_with("persistent://public/ns1/orders-"));
/// ```
pub fn generate_topic_name_in(namespace: &str, prefix: &str, persistent: bool) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let topic = format!("{}-{}-{}", prefix, random_name(8), millis);
    let domain = if persistent {
        "persistent"
    } else {
        "non-persistent"
    };
    format!("{}://public/{}/{}", domain, namespace, topic)
}

/// Joins the non-empty parts with `-`.
pub(crate) fn join_name_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name() {
        let name = random_name(5);
        assert_eq!(name.len(), 5);
        assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        assert!(random_name(0).is_empty());
    }

    #[test]
    fn test_namespace_name() {
        let ns = generate_namespace_name();
        assert!(ns.starts_with("ns-"));
        assert_eq!(ns.len(), 11);
    }

    #[test]
    fn test_topic_name() {
        let persistent = generate_topic_name_in("ns1", "orders", true);
        assert!(persistent.starts_with("persistent://public/ns1/orders-"));
        assert!(!persistent.contains(char::is_whitespace));

        let transient = generate_topic_name_in("ns1", "orders", false);
        assert!(transient.starts_with("non-persistent://public/ns1/orders-"));

        assert!(generate_topic_name("t", true).starts_with("persistent://public/default/t-"));
        assert_ne!(
            generate_topic_name("t", true),
            generate_topic_name("t", true)
        );
    }

    #[test]
    fn test_join_name_parts() {
        assert_eq!(join_name_parts(["CliSuite", "", "abcde"]), "CliSuite-abcde");
        assert_eq!(join_name_parts(["a", "b"]), "a-b");
    }
}
