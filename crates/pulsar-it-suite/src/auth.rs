//! Token authentication scaffolding.
//!
//! Keys and tokens are generated with the image's own CLI inside a
//! throw-away single-node cluster, then wired into brokers and the proxy
//! through environment variables before the suite cluster starts.

use std::sync::Arc;
use tracing::info;

use pulsar_it_orchestrator::topology::PULSAR_SCRIPT;
use pulsar_it_orchestrator::{
    Cluster, ClusterSpec, ContainerHandle, ContainerRuntime, OrchestratorConfig,
};

use crate::error::{Result, SuiteError};
use crate::naming::{join_name_parts, random_name};
use crate::suite::{ClusterTestBase, CLUSTER_SUFFIX_LEN};

/// Role with super-user rights.
pub const SUPER_USER_ROLE: &str = "super-user";

/// Role the proxy authenticates to brokers as.
pub const PROXY_ROLE: &str = "proxy";

/// Role of an ordinary client.
pub const REGULAR_USER_ROLE: &str = "client";

/// Broker-side token authentication provider.
pub const TOKEN_PROVIDER: &str = "org.apache.pulsar.broker.authentication.AuthenticationProviderToken";

/// Client-side token authentication plugin.
pub const TOKEN_CLIENT_PLUGIN: &str = "org.apache.pulsar.client.impl.auth.AuthenticationToken";

/// A secret key and one token per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    /// Base64-encoded symmetric secret key.
    pub secret_key: String,
    /// Token for [`SUPER_USER_ROLE`].
    pub super_user_token: String,
    /// Token for [`PROXY_ROLE`].
    pub proxy_token: String,
    /// Token for [`REGULAR_USER_ROLE`].
    pub client_token: String,
}

impl AuthTokens {
    /// Generates a key and tokens inside a throw-away cluster named `name`
    /// holding a single coordination node. The cluster is always stopped.
    pub async fn generate(
        name: &str,
        runtime: Arc<dyn ContainerRuntime>,
        config: &OrchestratorConfig,
    ) -> Result<Self> {
        let spec = ClusterSpec::builder(name)
            .with_coordination_count(1)
            .with_storage_count(0)
            .with_broker_count(0)
            .with_proxy_count(0)
            .build()?;

        let mut setup_config = config.clone();
        setup_config.cluster_init_command.clear();
        setup_config.write_compose_file = false;

        let mut cluster = Cluster::for_spec(spec, runtime, setup_config);
        let generated = match cluster.start().await {
            Ok(()) => match cluster.handles().first() {
                Some(handle) => Self::generate_in(handle).await,
                None => Err(SuiteError::TokenGeneration(format!(
                    "setup cluster {name} has no containers"
                ))),
            },
            Err(e) => Err(e.into()),
        };
        cluster.stop().await;
        generated
    }

    /// Generates a key and tokens by running the CLI in `container`.
    pub async fn generate_in(container: &ContainerHandle) -> Result<Self> {
        let key = container
            .exec_cmd_checked(&[PULSAR_SCRIPT, "tokens", "create-secret-key", "--base64"])
            .await?;
        let secret_key = non_empty(&key.stdout, "secret key")?;

        let key_uri = secret_key_uri(&secret_key);
        let mut tokens = Vec::with_capacity(3);
        for role in [SUPER_USER_ROLE, PROXY_ROLE, REGULAR_USER_ROLE] {
            let token = container
                .exec_cmd_checked(&[
                    PULSAR_SCRIPT,
                    "tokens",
                    "create",
                    "--secret-key",
                    key_uri.as_str(),
                    "--subject",
                    role,
                ])
                .await?;
            tokens.push(non_empty(&token.stdout, role)?);
        }

        let [super_user_token, proxy_token, client_token]: [String; 3] = tokens
            .try_into()
            .map_err(|_| SuiteError::TokenGeneration("expected three tokens".to_string()))?;

        info!(container = %container.container_name(), "Generated token authentication keys");
        Ok(Self {
            secret_key,
            super_user_token,
            proxy_token,
            client_token,
        })
    }

    /// Returns the secret key as a `data:` URI.
    pub fn secret_key_uri(&self) -> String {
        secret_key_uri(&self.secret_key)
    }

    /// Enables token authentication on every broker and the proxy.
    ///
    /// Must be called before the cluster starts.
    pub fn apply(&self, cluster: &mut Cluster) {
        let key_uri = self.secret_key_uri();
        let super_users = format!("{SUPER_USER_ROLE},{PROXY_ROLE}");
        let broker_auth = format!("token:{}", self.super_user_token);

        for broker in cluster.brokers_mut() {
            enable_token_auth(broker, &key_uri);
            broker
                .with_env("superUserRoles", super_users.clone())
                .with_env("brokerClientAuthenticationParameters", broker_auth.clone());
        }

        if let Some(proxy) = cluster.proxy_mut() {
            enable_token_auth(proxy, &key_uri);
            proxy.with_env(
                "brokerClientAuthenticationParameters",
                format!("token:{}", self.proxy_token),
            );
        }
    }
}

fn enable_token_auth(handle: &mut ContainerHandle, key_uri: &str) {
    handle
        .with_env("authenticationEnabled", "true")
        .with_env("authenticationProviders", TOKEN_PROVIDER)
        .with_env("authorizationEnabled", "true")
        .with_env("tokenSecretKey", key_uri)
        .with_env("brokerClientAuthenticationPlugin", TOKEN_CLIENT_PLUGIN);
}

fn secret_key_uri(key: &str) -> String {
    format!("data:;base64,{}", key)
}

fn non_empty(output: &str, what: &str) -> Result<String> {
    let value = output.trim();
    if value.is_empty() {
        return Err(SuiteError::TokenGeneration(format!("empty output for {what}")));
    }
    Ok(value.to_string())
}

impl ClusterTestBase {
    /// Sets up a cluster with two storage nodes, two brokers and a proxy,
    /// all requiring token authentication.
    pub async fn setup_token_auth_cluster(&mut self) -> Result<AuthTokens> {
        let setup_name = join_name_parts([
            self.suite_name(),
            "cli-setup",
            random_name(CLUSTER_SUFFIX_LEN).as_str(),
        ]);
        let tokens = AuthTokens::generate(&setup_name, self.runtime().clone(), self.config()).await?;

        let spec = ClusterSpec::builder(self.cluster_name(""))
            .with_storage_count(2)
            .with_broker_count(2)
            .with_proxy_count(1)
            .build()?;

        info!(cluster = %spec.name, "Setting up cluster with token authentication");
        self.setup_cluster_prepared(spec, |cluster| tokens.apply(cluster))
            .await?;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  abc\n", "key").unwrap(), "abc");
        assert!(matches!(
            non_empty("\n", "key"),
            Err(SuiteError::TokenGeneration(_))
        ));
    }

    #[test]
    fn test_secret_key_uri() {
        let tokens = AuthTokens {
            secret_key: "c2VjcmV0".to_string(),
            super_user_token: String::new(),
            proxy_token: String::new(),
            client_token: String::new(),
        };
        assert_eq!(tokens.secret_key_uri(), "data:;base64,c2VjcmV0");
    }
}
