//! Parameter sets for scenarios that run once per service URL or topic kind.

use pulsar_it_orchestrator::Cluster;

use crate::error::Result;

/// Returns `(plain-text service URL, persistent?)` for persistent and
/// non-persistent topics.
pub fn service_url_and_topics(cluster: &Cluster) -> Result<Vec<(String, bool)>> {
    let url = cluster.get_plain_text_service_url()?;
    Ok(vec![(url.clone(), true), (url, false)])
}

/// Returns every service URL a client scenario should be run against.
pub fn service_urls(cluster: &Cluster) -> Result<Vec<String>> {
    Ok(vec![cluster.get_plain_text_service_url()?])
}
