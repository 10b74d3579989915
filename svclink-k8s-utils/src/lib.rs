use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use kube::config::{KubeConfigOptions, Kubeconfig};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Longest name accepted for objects that also appear as label values.
pub const MAX_NAME_LENGTH: usize = 63;

const HASH_SUFFIX_LENGTH: usize = 10;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid base64 credentials: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decodes a base64 encoded credential blob, tolerating surrounding whitespace.
pub fn decode_credentials(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded.trim())?)
}

/// Builds a client for a remote cluster from raw kubeconfig bytes using the
/// kubeconfig's current context.
pub async fn client_from_kubeconfig(kubeconfig: &[u8], timeout: Duration) -> Result<kube::Client> {
    let yaml = String::from_utf8_lossy(kubeconfig);
    let kubeconfig = Kubeconfig::from_yaml(&yaml)?;
    let mut config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    debug!("built client config for {}", config.cluster_url);
    Ok(kube::Client::try_from(config)?)
}

/// Lightweight reachability probe returning the apiserver git version.
pub async fn server_version(client: &kube::Client) -> Result<String> {
    let info = client.apiserver_version().await?;
    Ok(info.git_version)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Returns `name` unchanged when it fits within `max`, otherwise cuts it and
/// appends a short SHA-256 of the full name so distinct inputs stay distinct.
pub fn bounded_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let keep = max.saturating_sub(HASH_SUFFIX_LENGTH + 1);
    let mut prefix: String = name.chars().take(keep).collect();
    while prefix.ends_with(['-', '.']) {
        prefix.pop();
    }
    format!("{prefix}-{}", &hash[..HASH_SUFFIX_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: east
  cluster:
    server: https://east.example.com:6443
contexts:
- name: east
  context:
    cluster: east
    user: reader
current-context: east
users:
- name: reader
  user:
    token: abc123
"#;

    #[test]
    fn test_decode_credentials() {
        let encoded = STANDARD.encode("hello");
        assert_eq!(decode_credentials(&encoded).unwrap(), b"hello");
        assert_eq!(
            decode_credentials(&format!("  {encoded}\n")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_credentials_invalid() {
        assert!(matches!(
            decode_credentials("not base64!!"),
            Err(Error::Base64(_))
        ));
    }

    #[tokio::test]
    async fn test_client_from_kubeconfig() {
        let client = client_from_kubeconfig(KUBECONFIG.as_bytes(), Duration::from_secs(5)).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_client_from_kubeconfig_garbage() {
        let client = client_from_kubeconfig(b"clusters: [unterminated", Duration::from_secs(5)).await;
        assert!(client.is_err());
    }

    #[test]
    fn test_bounded_name_short() {
        assert_eq!(bounded_name("web-svclink-east", MAX_NAME_LENGTH), "web-svclink-east");
    }

    #[test]
    fn test_bounded_name_long() {
        let a = format!("{}-svclink-east", "a".repeat(60));
        let b = format!("{}-svclink-west", "a".repeat(60));
        let bounded_a = bounded_name(&a, MAX_NAME_LENGTH);
        let bounded_b = bounded_name(&b, MAX_NAME_LENGTH);
        assert!(bounded_a.len() <= MAX_NAME_LENGTH);
        assert!(bounded_b.len() <= MAX_NAME_LENGTH);
        assert_ne!(bounded_a, bounded_b);
        assert_eq!(bounded_a, bounded_name(&a, MAX_NAME_LENGTH));
    }

    #[test]
    fn test_bounded_name_strips_trailing_separator() {
        let name = format!("{}-{}", "b".repeat(51), "c".repeat(20));
        let bounded = bounded_name(&name, MAX_NAME_LENGTH);
        assert!(!bounded.contains("--"));
    }
}
