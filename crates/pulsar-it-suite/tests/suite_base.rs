//! Suite scaffolding against the in-memory runtime.

use std::path::Path;
use std::sync::Arc;

use pulsar_it_orchestrator::runtime::InMemoryRuntime;
use pulsar_it_orchestrator::{ClusterState, ExecResult, NodeRole, OrchestratorConfig};
use pulsar_it_suite::auth::{SUPER_USER_ROLE, TOKEN_PROVIDER};
use pulsar_it_suite::{init_test_logging, service_url_and_topics, service_urls, ClusterTestBase, SuiteError};

fn config(output: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        output_root: output.to_path_buf(),
        startup_timeout_secs: 5,
        readiness_poll_interval_ms: 20,
        exec_poll_interval_ms: 10,
        capture_timeout_secs: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_setup_and_tear_down() -> anyhow::Result<()> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut base = ClusterTestBase::with_runtime("SmokeSuite", runtime.clone(), config(dir.path()));

    assert!(matches!(base.cluster(), Err(SuiteError::NoCluster(_))));

    let cluster = base
        .setup_cluster_with("small", |b| b.with_storage_count(1).with_broker_count(1))
        .await?;
    assert!(cluster.name().starts_with("SmokeSuite-small-"));
    assert_eq!(cluster.name().len(), "SmokeSuite-small-".len() + 5);
    assert_eq!(cluster.state(), ClusterState::Running);
    assert_eq!(cluster.get_brokers().len(), 1);

    let urls = service_urls(cluster)?;
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("pulsar://127.0.0.1:"));

    let matrix = service_url_and_topics(cluster)?;
    assert_eq!(matrix, vec![(urls[0].clone(), true), (urls[0].clone(), false)]);

    base.tear_down_cluster().await;
    base.tear_down_cluster().await;
    assert!(base.cluster().is_err());
    assert_eq!(runtime.container_count(), 0);
    assert_eq!(runtime.networks_removed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_default_name_skips_empty_prefix() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut base = ClusterTestBase::with_runtime("NamedSuite", runtime, config(dir.path()));

    let name = base.setup_cluster("").await?.name().to_string();
    assert!(name.starts_with("NamedSuite-"));
    assert!(!name.contains("--"));

    base.tear_down_cluster().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_start_is_still_torn_down() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let runtime = Arc::new(InMemoryRuntime::new().with_exec_handler(|_, cmd| {
        if cmd[0].ends_with("init-cluster.sh") {
            ExecResult::new(1, "", "boom\n")
        } else {
            ExecResult::new(0, "", "")
        }
    }));
    let mut base = ClusterTestBase::with_runtime("BrokenSuite", runtime.clone(), config(dir.path()));

    let err = base.setup_cluster("").await.unwrap_err();
    assert!(err.as_orchestrator().is_some());
    assert_eq!(base.cluster()?.state(), ClusterState::Failed);
    assert_eq!(runtime.running_containers().len(), 1);

    base.tear_down_cluster().await;
    assert!(runtime.running_containers().is_empty());
    assert_eq!(runtime.networks_removed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_spec_never_reaches_runtime() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut base = ClusterTestBase::with_runtime("BadSpec", runtime.clone(), config(dir.path()));

    let result = base.setup_cluster_with("", |b| b.with_broker_count(-1)).await;
    assert!(result.is_err());
    assert!(base.cluster().is_err());
    assert!(runtime.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_token_auth_cluster() -> anyhow::Result<()> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let runtime = Arc::new(InMemoryRuntime::new().with_exec_handler(|_, cmd| {
        let args: Vec<&str> = cmd.iter().skip(1).map(String::as_str).collect();
        match args.as_slice() {
            ["tokens", "create-secret-key", "--base64"] => ExecResult::new(0, "c2VjcmV0\n", ""),
            ["tokens", "create", "--secret-key", "data:;base64,c2VjcmV0", "--subject", role] => {
                ExecResult::new(0, format!("token-{role}\n"), "")
            }
            _ => ExecResult::new(0, "", ""),
        }
    }));
    let mut base = ClusterTestBase::with_runtime("TokenAuthSuite", runtime.clone(), config(dir.path()));

    let tokens = base.setup_token_auth_cluster().await?;
    assert_eq!(tokens.secret_key, "c2VjcmV0");
    assert_eq!(tokens.super_user_token, "token-super-user");
    assert_eq!(tokens.proxy_token, "token-proxy");
    assert_eq!(tokens.client_token, "token-client");

    let cluster = base.cluster()?;
    assert_eq!(cluster.get_all_of(NodeRole::Storage).len(), 2);
    assert_eq!(cluster.get_brokers().len(), 2);

    for broker in cluster.get_brokers() {
        let env = broker.env();
        assert_eq!(env["authenticationEnabled"], "true");
        assert_eq!(env["authenticationProviders"], TOKEN_PROVIDER);
        assert_eq!(env["tokenSecretKey"], "data:;base64,c2VjcmV0");
        assert_eq!(env["superUserRoles"], format!("{SUPER_USER_ROLE},proxy"));
        assert_eq!(env["brokerClientAuthenticationParameters"], "token:token-super-user");
    }
    let proxy = cluster.proxy().expect("proxy");
    assert_eq!(proxy.env()["brokerClientAuthenticationParameters"], "token:token-proxy");
    assert!(!proxy.env().contains_key("superUserRoles"));

    // The key-generation cluster is gone before the suite cluster starts.
    let setup_removed = runtime
        .networks_removed()
        .iter()
        .any(|n| n.starts_with("TokenAuthSuite-cli-setup-"));
    assert!(setup_removed);

    base.tear_down_cluster().await;
    assert_eq!(runtime.container_count(), 0);
    Ok(())
}
