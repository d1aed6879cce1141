//! Readiness probes.

use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How a container is judged ready to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// HTTP GET of `path` on the mapped `port` must return 200.
    Http {
        /// Container port.
        port: u16,
        /// Request path.
        path: String,
    },

    /// Every listed container port must accept a TCP connection.
    Tcp {
        /// Container ports.
        ports: Vec<u16>,
    },
}

impl ReadinessProbe {
    /// Picks the probe for a container: HTTP when only an HTTP port is
    /// declared, TCP on every declared port otherwise.
    pub fn for_ports(service_port: Option<u16>, http_port: Option<u16>, health_path: &str) -> Self {
        match (service_port, http_port) {
            (None, Some(port)) => Self::Http {
                port,
                path: health_path.to_string(),
            },
            _ => Self::Tcp {
                ports: service_port.into_iter().chain(http_port).collect(),
            },
        }
    }

    /// In-container commands that must exit 0 before the container counts as
    /// ready. A mapped port accepts connections on the host as soon as the
    /// container starts, so TCP readiness also checks for a listener inside.
    pub fn listening_checks(&self) -> Vec<Vec<String>> {
        match self {
            Self::Http { .. } => Vec::new(),
            Self::Tcp { ports } => ports.iter().map(|p| listening_check_command(*p)).collect(),
        }
    }

    /// Runs one probe attempt against `host` using the container's port mappings.
    pub async fn check(
        &self,
        host: &str,
        mappings: &HashMap<u16, u16>,
        client: &reqwest::Client,
    ) -> bool {
        match self {
            Self::Http { port, path } => {
                let Some(host_port) = mappings.get(port) else {
                    return false;
                };
                let url = format!("http://{}:{}{}", host, host_port, path);
                match client.get(&url).timeout(CONNECT_TIMEOUT).send().await {
                    Ok(response) => response.status() == reqwest::StatusCode::OK,
                    Err(e) => {
                        debug!(url = %url, error = %e, "HTTP probe failed");
                        false
                    }
                }
            }
            Self::Tcp { ports } => {
                for port in ports {
                    let Some(host_port) = mappings.get(port) else {
                        return false;
                    };
                    let connect = TcpStream::connect((host, *host_port));
                    match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            debug!(port, host_port, error = %e, "TCP probe failed");
                            return false;
                        }
                        Err(_) => return false,
                    }
                }
                true
            }
        }
    }
}

/// Shell command exiting 0 when something inside the container listens on
/// `port`. Falls back through `/proc/net/tcp`, `nc` and bash's `/dev/tcp`
/// since images ship different tools.
pub fn listening_check_command(port: u16) -> Vec<String> {
    let script = format!(
        "cat /proc/net/tcp* 2>/dev/null | awk '{{print $2}}' | grep -qi ':{port:04x}$' \
         || nc -z localhost {port} 2>/dev/null \
         || bash -c '</dev/tcp/localhost/{port}' 2>/dev/null"
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_selection() {
        assert_eq!(
            ReadinessProbe::for_ports(None, Some(6750), "/metrics"),
            ReadinessProbe::Http {
                port: 6750,
                path: "/metrics".to_string()
            }
        );
        assert_eq!(
            ReadinessProbe::for_ports(Some(6650), Some(8080), "/metrics"),
            ReadinessProbe::Tcp {
                ports: vec![6650, 8080]
            }
        );
        assert_eq!(
            ReadinessProbe::for_ports(Some(2181), None, "/metrics"),
            ReadinessProbe::Tcp { ports: vec![2181] }
        );
    }

    #[test]
    fn test_listening_checks() {
        let cmd = listening_check_command(2181);
        assert_eq!(&cmd[..2], &["sh".to_string(), "-c".to_string()]);
        assert!(cmd[2].contains(":0885$"));
        assert!(cmd[2].contains("nc -z localhost 2181"));
        assert!(cmd[2].contains("/dev/tcp/localhost/2181"));

        let tcp = ReadinessProbe::for_ports(Some(6650), Some(8080), "/metrics");
        assert_eq!(
            tcp.listening_checks(),
            vec![listening_check_command(6650), listening_check_command(8080)]
        );

        let http = ReadinessProbe::for_ports(None, Some(6750), "/metrics");
        assert!(http.listening_checks().is_empty());
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host_port = listener.local_addr().unwrap().port();
        let client = reqwest::Client::new();

        let probe = ReadinessProbe::Tcp { ports: vec![2181] };
        let mappings: HashMap<u16, u16> = [(2181, host_port)].into_iter().collect();
        assert!(probe.check("127.0.0.1", &mappings, &client).await);

        drop(listener);
        assert!(!probe.check("127.0.0.1", &HashMap::new(), &client).await);
    }
}
