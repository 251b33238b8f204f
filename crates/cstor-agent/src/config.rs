use crate::error::{AgentError, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::time::Duration;
use tracing::{debug, warn};

/// Pool UID owned by this agent instance
pub const CSTOR_ID_ENV: &str = "OPENEBS_IO_CSTOR_ID";
pub const NAMESPACE_ENV: &str = "NAMESPACE";
pub const OPENEBS_NAMESPACE_ENV: &str = "OPENEBS_NAMESPACE";
/// Informer resync override in seconds
pub const RESYNC_INTERVAL_ENV: &str = "RESYNC_INTERVAL";

const DEFAULT_NAMESPACE: &str = "openebs";
const DEFAULT_RESYNC: Duration = Duration::from_secs(30);

/// Runtime configuration of the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Pool UID this agent owns; resources labeled with any other UID are ignored
    pub pool_uid: String,
    /// Namespace of BlockDevice / BlockDeviceClaim lookups
    pub namespace: String,
    /// Informer periodic resync
    pub resync_interval: Duration,
    pub zrepl_check_interval: Duration,
    pub pool_wait_attempts: u32,
    pub pool_wait_interval: Duration,
    pub transfer_attempts: u32,
    pub transfer_retry_interval: Duration,
}

impl AgentConfig {
    pub fn new(pool_uid: impl Into<String>) -> Self {
        Self {
            pool_uid: pool_uid.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            resync_interval: DEFAULT_RESYNC,
            zrepl_check_interval: Duration::from_secs(3),
            pool_wait_attempts: 5,
            pool_wait_interval: Duration::from_secs(5),
            transfer_attempts: 10,
            transfer_retry_interval: Duration::from_secs(5),
        }
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pool_uid = lookup(CSTOR_ID_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AgentError::fatal(
                    format!("{} is not set", CSTOR_ID_ENV),
                    "Set the environment variable to the UID of the pool instance this agent manages",
                )
            })?;

        let mut config = Self::new(pool_uid);
        if let Some(ns) = [NAMESPACE_ENV, OPENEBS_NAMESPACE_ENV]
            .iter()
            .filter_map(|k| lookup(k))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
        {
            config.namespace = ns;
        }
        config.resync_interval = parse_resync_interval(lookup(RESYNC_INTERVAL_ENV).as_deref());
        Ok(config)
    }
}

/// Blank, non-numeric or zero values fall back to the 30 s default
pub fn parse_resync_interval(raw: Option<&str>) -> Duration {
    match raw.map(str::trim).map(str::parse::<u64>) {
        Some(Ok(secs)) if secs >= 1 => Duration::from_secs(secs),
        Some(Err(_)) => {
            warn!("Ignoring invalid {} value, using default", RESYNC_INTERVAL_ENV);
            DEFAULT_RESYNC
        }
        _ => DEFAULT_RESYNC,
    }
}

/// Client configuration: the kubeconfig at `path` when one is given,
/// otherwise the in-cluster service account
pub async fn client_config(path: Option<&str>) -> Result<kube::Config> {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => {
            debug!("Loading kubeconfig from {}", path);
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                AgentError::fatal(
                    format!("Failed to read kubeconfig {}: {}", path, e),
                    "The kubeconfig must exist and be valid YAML",
                )
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    AgentError::fatal(
                        format!("Invalid kubeconfig {}: {}", path, e),
                        "Check current-context and the referenced cluster/user entries",
                    )
                })
        }
        None => kube::Config::incluster().map_err(|e| {
            AgentError::fatal(
                format!("In-cluster configuration unavailable: {}", e),
                "Pass --kubeconfig when running outside the cluster",
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_resync_interval_parsing() {
        assert_eq!(parse_resync_interval(None), Duration::from_secs(30));
        assert_eq!(parse_resync_interval(Some("")), Duration::from_secs(30));
        assert_eq!(parse_resync_interval(Some("abc")), Duration::from_secs(30));
        assert_eq!(parse_resync_interval(Some("0")), Duration::from_secs(30));
        assert_eq!(parse_resync_interval(Some(" 45 ")), Duration::from_secs(45));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = AgentConfig::from_lookup(lookup(&[
            (CSTOR_ID_ENV, "aaaa"),
            (OPENEBS_NAMESPACE_ENV, "storage"),
            (RESYNC_INTERVAL_ENV, "10"),
        ]))
        .unwrap();
        assert_eq!(config.pool_uid, "aaaa");
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.resync_interval, Duration::from_secs(10));
        assert_eq!(config.pool_wait_attempts, 5);

        let preferred =
            AgentConfig::from_lookup(lookup(&[(CSTOR_ID_ENV, "aaaa"), (NAMESPACE_ENV, "ns1"), (OPENEBS_NAMESPACE_ENV, "ns2")]))
                .unwrap();
        assert_eq!(preferred.namespace, "ns1");
    }

    #[test]
    fn test_missing_pool_uid_is_fatal() {
        let err = AgentConfig::from_lookup(lookup(&[(CSTOR_ID_ENV, "  ")])).unwrap_err();
        assert!(matches!(err, AgentError::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_kubeconfig_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
apiVersion: v1
kind: Config
current-context: dev
contexts:
  - name: dev
    context:
      cluster: local
      user: agent
      namespace: storage
clusters:
  - name: local
    cluster:
      server: https://10.0.0.1:6443
      insecure-skip-tls-verify: true
users:
  - name: agent
    user:
      token: secret-token
"#
        )
        .unwrap();

        let config = client_config(path.to_str()).await.unwrap();
        assert_eq!(config.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(config.cluster_url.port_u16(), Some(6443));
        assert_eq!(config.default_namespace, "storage");
        assert!(config.accept_invalid_certs);
    }

    #[tokio::test]
    async fn test_kubeconfig_missing_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "current-context: nope\ncontexts: []\n").unwrap();
        let err = client_config(path.to_str()).await.unwrap_err();
        assert!(matches!(err, AgentError::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_file() {
        let err = client_config(Some("/nonexistent/kubeconfig")).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kubeconfig"));
    }
}
