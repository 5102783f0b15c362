//! Validation helpers shared by the stages

use std::path::Path;
use std::time::Duration;

use super::{CloudSnapshot, ConfigError};
use crate::store::{parse_endpoint, Permissions, StoreClient, StoreConnector, StoreError};

/// Deadline for the remote credential check
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff before a pass that failed on a transient store error is retried
pub const AUTH_RETRY_DELAY: Duration = Duration::from_secs(30);

pub fn require_dir(path: &Path, label: &str) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::invalid(format!("{} is not set", label)));
    }
    if !path.is_dir() {
        return Err(ConfigError::invalid(format!(
            "{} {} does not exist or is not a directory",
            label,
            path.display()
        )));
    }
    Ok(())
}

pub fn require_file(path: &Path, label: &str) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::invalid(format!(
            "{} {} does not exist",
            label,
            path.display()
        )));
    }
    Ok(())
}

/// Race the credential check against `deadline`
pub async fn check_auth_with_timeout(
    client: &dyn StoreClient,
    deadline: Duration,
) -> Result<Permissions, StoreError> {
    match tokio::time::timeout(deadline, client.check_auth()).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

/// Denied credentials and bad endpoints are terminal, anything
/// network-shaped is retried
pub fn classify_store_error(error: StoreError) -> ConfigError {
    if error.is_terminal() {
        ConfigError::invalid(error.to_string())
    } else {
        ConfigError::Retryable {
            reason: format!(
                "{}, retrying in {}s",
                error,
                AUTH_RETRY_DELAY.as_secs()
            ),
            retry_after: AUTH_RETRY_DELAY,
        }
    }
}

pub fn check_permissions(permissions: Permissions, upload: bool) -> Result<(), ConfigError> {
    if !permissions.read {
        return Err(ConfigError::invalid(
            "Cloud credentials do not grant read access",
        ));
    }
    if upload && !permissions.write {
        return Err(ConfigError::invalid(
            "Cloud upload is enabled but the credentials do not grant write access",
        ));
    }
    Ok(())
}

pub async fn validate_cloud(
    connector: &dyn StoreConnector,
    cloud: &CloudSnapshot,
) -> Result<(), ConfigError> {
    let credentials = &cloud.credentials;
    for (value, label) in [
        (&credentials.endpoint, "Cloud endpoint"),
        (&credentials.user, "Cloud user"),
        (&credentials.pass_key, "Cloud pass key"),
        (&credentials.account, "Cloud account"),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(format!("{} is not set", label)));
        }
    }
    parse_endpoint(&credentials.endpoint).map_err(classify_store_error)?;

    let client = connector.connect(credentials).map_err(classify_store_error)?;
    let permissions = check_auth_with_timeout(client.as_ref(), AUTH_TIMEOUT)
        .await
        .map_err(classify_store_error)?;

    check_permissions(permissions, cloud.upload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AuthScript, FakeConnector};
    use crate::store::CloudCredentials;
    use tokio::time::Instant;

    fn cloud(upload: bool) -> CloudSnapshot {
        CloudSnapshot {
            credentials: CloudCredentials {
                endpoint: "https://store.example".to_string(),
                user: "user".to_string(),
                pass_key: "key".to_string(),
                account: "guild".to_string(),
            },
            upload,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_check_times_out_exactly_at_deadline() {
        let connector = FakeConnector::new(AuthScript::Hang);
        let client = connector.client();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            check_auth_with_timeout(client.as_ref(), AUTH_TIMEOUT).await
        });

        tokio::time::sleep(AUTH_TIMEOUT - Duration::from_millis(1)).await;
        assert!(!handle.is_finished(), "must not fail before the deadline");

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == AUTH_TIMEOUT));
        assert_eq!(start.elapsed(), AUTH_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let connector = FakeConnector::new(AuthScript::Hang);
        let error = validate_cloud(&connector, &cloud(false)).await.unwrap_err();
        assert_eq!(error.retry_after(), Some(AUTH_RETRY_DELAY));
    }

    #[tokio::test]
    async fn test_denied_credentials_are_terminal() {
        let connector = FakeConnector::new(AuthScript::Deny);
        let error = validate_cloud(&connector, &cloud(false)).await.unwrap_err();
        assert_eq!(error, ConfigError::invalid("Cloud credentials were rejected"));
    }

    #[tokio::test]
    async fn test_network_error_is_retryable() {
        let connector = FakeConnector::new(AuthScript::NetworkError);
        let error = validate_cloud(&connector, &cloud(false)).await.unwrap_err();
        assert_eq!(error.retry_after(), Some(AUTH_RETRY_DELAY));
    }

    #[tokio::test]
    async fn test_upload_requires_write() {
        let connector = FakeConnector::new(AuthScript::Grant(Permissions {
            read: true,
            write: false,
        }));
        assert!(validate_cloud(&connector, &cloud(false)).await.is_ok());
        let error = validate_cloud(&connector, &cloud(true)).await.unwrap_err();
        assert_eq!(error.retry_after(), None);
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_network() {
        let connector = FakeConnector::new(AuthScript::Hang);
        let mut snapshot = cloud(false);
        snapshot.credentials.pass_key.clear();

        let error = validate_cloud(&connector, &snapshot).await.unwrap_err();

        assert_eq!(error, ConfigError::invalid("Cloud pass key is not set"));
        assert_eq!(connector.auth_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_terminal() {
        let connector = FakeConnector::new(AuthScript::NetworkError);

        for endpoint in ["", "   ", "store.example/api", "ftp://store.example"] {
            let mut snapshot = cloud(false);
            snapshot.credentials.endpoint = endpoint.to_string();

            let error = validate_cloud(&connector, &snapshot).await.unwrap_err();
            assert_eq!(error.retry_after(), None, "{:?}", endpoint);
        }
        assert_eq!(connector.auth_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_endpoint_through_http_connector_is_terminal() {
        let mut snapshot = cloud(false);
        snapshot.credentials.endpoint.clear();

        let error = validate_cloud(&crate::store::HttpConnector, &snapshot)
            .await
            .unwrap_err();

        assert_eq!(error, ConfigError::invalid("Cloud endpoint is not set"));
    }

    #[test]
    fn test_builder_errors_are_terminal() {
        let error = classify_store_error(StoreError::InvalidRequest("bad header".to_string()));
        assert_eq!(error.retry_after(), None);
        let error = classify_store_error(StoreError::Network("reset".to_string()));
        assert_eq!(error.retry_after(), Some(AUTH_RETRY_DELAY));
    }

    #[test]
    fn test_require_dir_messages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(require_dir(dir.path(), "Storage path").is_ok());
        assert_eq!(
            require_dir(Path::new(""), "Storage path"),
            Err(ConfigError::invalid("Storage path is not set"))
        );
        assert!(require_dir(&dir.path().join("missing"), "Storage path").is_err());
    }
}
