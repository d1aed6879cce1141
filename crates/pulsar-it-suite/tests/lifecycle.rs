//! End-to-end cluster lifecycle against a real Docker daemon.
//!
//! Run with `cargo test -p pulsar-it-suite --test lifecycle -- --ignored`.

use pulsar_it_orchestrator::NodeRole;
use pulsar_it_suite::{generate_topic_name, init_test_logging, service_url_and_topics, ClusterTestBase};

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_start_admin_stop() -> anyhow::Result<()> {
    init_test_logging();
    let mut base = ClusterTestBase::docker("LifecycleTest").await?;
    let output_root = base.config().container_logs_dir();

    let setup = base
        .setup_cluster_with("e2e", |b| {
            b.with_coordination_count(1)
                .with_storage_count(1)
                .with_broker_count(2)
                .with_proxy_count(1)
        })
        .await
        .map(|cluster| cluster.name().to_string());

    let outcome = async {
        let name = setup?;
        let cluster = base.cluster()?;
        assert_eq!(cluster.get_all_of(NodeRole::Coordination).len(), 1);
        assert_eq!(cluster.get_brokers().len(), 2);

        let created = cluster
            .run_admin_command_on_any_broker(&["tenants", "create", "e2e-tenant", "--allowed-clusters", name.as_str()])
            .await?;
        assert_eq!(created.exit_code, 0, "{}", created.combined_output());

        let listed = cluster
            .run_admin_command_on_any_broker(&["tenants", "list"])
            .await?;
        assert!(listed.stdout_lines().contains(&"e2e-tenant"));

        for (url, persistent) in service_url_and_topics(cluster)? {
            assert!(url.starts_with("pulsar://"));
            let topic = generate_topic_name("e2e", persistent);
            let produced = cluster
                .run_client_command_on_any_broker(&["produce", "-m", "hello", "-n", "1", topic.as_str()])
                .await?;
            assert_eq!(produced.exit_code, 0, "{}", produced.combined_output());
        }

        let names: Vec<String> = cluster.handles().iter().map(|h| h.container_name()).collect();
        anyhow::Ok(names)
    }
    .await;

    base.tear_down_cluster().await;

    for name in outcome? {
        assert!(output_root.join(&name).join("docker.log").exists(), "{name}");
    }
    Ok(())
}
