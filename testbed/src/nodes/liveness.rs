//! Liveness polling against a node's API endpoint

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{TestbedError, TestbedResult};

/// How often, and how many times, to poll before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(200),
        }
    }
}

/// Poll until the endpoint reports `expected` as its identity
pub async fn wait_for_identity<F, Fut>(
    expected: &str,
    policy: RetryPolicy,
    mut query: F,
) -> TestbedResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TestbedResult<String>>,
{
    for attempt in 1..=policy.attempts {
        match query().await {
            Ok(found) if found == expected => {
                debug!(attempt, peer_id = expected, "node is live");
                return Ok(());
            }
            Ok(found) => debug!(attempt, %found, "liveness check: unexpected peer at endpoint"),
            Err(e) => debug!(attempt, "liveness check failed: {}", e),
        }
        if attempt < policy.attempts {
            sleep(policy.interval).await;
        }
    }

    Err(TestbedError::LivenessTimeout {
        peer_id: expected.to_string(),
        attempts: policy.attempts,
    })
}

/// Client used for every API call against a node
pub fn api_client() -> TestbedResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?)
}

/// `GET /api/v0/id` and extract the `ID` field
pub async fn http_identity(client: &reqwest::Client, api_addr: &str) -> TestbedResult<String> {
    let body = client
        .get(format!("http://{api_addr}/api/v0/id"))
        .send()
        .await?
        .bytes()
        .await?;
    parse_identity(&body)
}

/// Extract the identity from an `/api/v0/id` response body
pub fn parse_identity(body: &[u8]) -> TestbedResult<String> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    value
        .get("ID")
        .and_then(|id| id.as_str())
        .map(str::to_string)
        .ok_or_else(|| TestbedError::validation("liveness check failed: ID field not present in output"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(parse_identity(br#"{"ID":"QmPeer","Addresses":[]}"#).unwrap(), "QmPeer");
        assert!(parse_identity(br#"{"Addresses":[]}"#).is_err());
        assert!(parse_identity(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_succeeds_once_identity_matches() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = wait_for_identity("QmA", fast_policy(10), || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(TestbedError::process("connection refused")),
                    1 => Ok("QmOther".to_string()),
                    _ => Ok("QmA".to_string()),
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_liveness_timeout() {
        let err = wait_for_identity("QmA", fast_policy(4), || async {
            Err::<String, _>(TestbedError::process("connection refused"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TestbedError::LivenessTimeout { attempts: 4, .. }));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_http_identity_against_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/id"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ID":"QmServer"}"#))
            .mount(&server)
            .await;

        let addr = server.address().to_string();
        let client = api_client().unwrap();
        assert_eq!(http_identity(&client, &addr).await.unwrap(), "QmServer");

        let (client, addr) = (&client, addr.as_str());
        let result = wait_for_identity("QmServer", fast_policy(3), move || http_identity(client, addr)).await;
        assert!(result.is_ok());
    }
}
