//! DynamoDB Local emulator.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProbeError;
use crate::image::{CMD_MARKER, ImageDescriptor};
use crate::images::probe_client;
use crate::store::InstanceStore;

const TAG: &str = "amazon/dynamodb-local:latest";
const PORT: u16 = 8000;
const DESCRIBE_LIMITS: &str = "DynamoDB_20120810.DescribeLimits";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// AWS JSON protocol error body.
#[derive(Debug, Deserialize)]
struct AwsError {
    #[serde(rename = "__type")]
    kind: String,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// `amazon/dynamodb-local` on port 8000.
#[derive(Debug, Clone)]
pub struct DynamoDbLocal {
    in_memory: bool,
    http: reqwest::Client,
}

impl Default for DynamoDbLocal {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamoDbLocal {
    pub fn new() -> Self {
        Self {
            in_memory: false,
            http: probe_client(),
        }
    }

    /// Run with `-inMemory -sharedDb` so all clients see one database and
    /// nothing is written to disk.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }
}

#[async_trait]
impl ImageDescriptor for DynamoDbLocal {
    fn id(&self) -> &str {
        "dynamodb-local"
    }

    fn tag(&self) -> String {
        TAG.to_string()
    }

    fn http_port(&self) -> u16 {
        PORT
    }

    fn https_port(&self) -> u16 {
        PORT
    }

    fn env_vars(&self) -> Vec<String> {
        if self.in_memory {
            vec![format!(
                "{CMD_MARKER}-jar DynamoDBLocal.jar -inMemory -sharedDb"
            )]
        } else {
            Vec::new()
        }
    }

    /// Issue `DescribeLimits`. Any protocol-level answer means the service
    /// is up, including an AWS error for the unsigned request.
    async fn ping(&self, store: &InstanceStore) -> Result<(), ProbeError> {
        let response = self
            .http
            .post(store.http_url())
            .header("X-Amz-Target", DESCRIBE_LIMITS)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body("{}")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await?;
        match serde_json::from_str::<AwsError>(&body) {
            Ok(err) if status.is_client_error() => {
                tracing::trace!(kind = %err.kind, message = ?err.message, "DynamoDB answered");
                Ok(())
            }
            _ => Err(ProbeError::Unhealthy(format!("HTTP {status}: {body}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::LaunchArgs;

    #[test]
    fn test_descriptor_shape() {
        let image = DynamoDbLocal::new();
        assert_eq!(image.id(), "dynamodb-local");
        assert_eq!(image.tag(), "amazon/dynamodb-local:latest");
        assert_eq!(image.http_port(), 8000);
        assert_eq!(image.https_port(), 8000);
        assert!(image.env_vars().is_empty());
    }

    #[test]
    fn test_in_memory_sets_command() {
        let args = LaunchArgs::partition(&DynamoDbLocal::new().in_memory().env_vars());
        assert_eq!(
            args.cmd,
            vec!["-jar", "DynamoDBLocal.jar", "-inMemory", "-sharedDb"]
        );
        assert!(args.env.is_empty());
    }

    #[test]
    fn test_aws_error_body_parses() {
        let body = r#"{"__type":"com.amazonaws.dynamodb.v20120810#MissingAuthenticationToken","Message":"Request must contain a valid (registered) AWS Access Key ID."}"#;
        let err: AwsError = serde_json::from_str(body).unwrap();
        assert!(err.kind.ends_with("MissingAuthenticationToken"));
        assert!(err.message.is_some());
    }
}
