//! RunPod compute provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::process::{run_tool, ToolError};

use super::config::RemoteConfig;
use super::error::RemoteError;
use super::traits::ComputeProvider;
use super::types::SshEndpoint;

/// Provider driving pods through `runpodctl` and the GraphQL API.
pub struct RunPodProvider {
    config: RemoteConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PodData>,
    errors: Option<Vec<GraphQlMessage>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PodData {
    pod: Option<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    runtime: Option<PodRuntime>,
}

#[derive(Debug, Deserialize)]
struct PodRuntime {
    #[serde(default)]
    ports: Vec<PortMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    ip: String,
    private_port: u16,
    public_port: u16,
}

const POD_PORTS_QUERY: &str = r#"
query Pod($podId: String!) {
  pod(input: {podId: $podId}) {
    id
    name
    runtime {
      ports {
        ip
        isIpPublic
        privatePort
        publicPort
        type
      }
    }
  }
}
"#;

impl RunPodProvider {
    /// Creates a provider.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    async fn runpodctl(&self, args: &[&str]) -> Result<(), ToolError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        run_tool(
            &self.config.runpodctl_path,
            &args,
            self.config.command_timeout_secs,
        )
        .await
        .map(|_| ())
    }
}

/// Extracts the public address mapped to private port 22.
fn ssh_from_response(instance_id: &str, response: GraphQlResponse) -> Result<SshEndpoint, RemoteError> {
    if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
        let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
        return Err(RemoteError::GraphQl(messages.join("; ")));
    }

    let pod = response
        .data
        .and_then(|d| d.pod)
        .ok_or_else(|| RemoteError::SshEndpoint(format!("no pod with id {instance_id}")))?;

    pod.runtime
        .into_iter()
        .flat_map(|r| r.ports)
        .find(|p| p.private_port == 22)
        .map(|p| SshEndpoint {
            host: p.ip,
            port: p.public_port,
        })
        .ok_or_else(|| RemoteError::SshEndpoint(format!("no SSH port mapping for {instance_id}")))
}

#[async_trait]
impl ComputeProvider for RunPodProvider {
    fn name(&self) -> &str {
        "runpod"
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), RemoteError> {
        info!("Starting pod {}", instance_id);
        match self.runpodctl(&["start", "pod", instance_id]).await {
            Ok(()) => Ok(()),
            // A pod that is already running refuses to start; readiness
            // polling decides whether it is usable.
            Err(e @ ToolError::Failed { .. }) => {
                warn!("runpodctl start for {} reported: {}", instance_id, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn health(&self, server_url: &str) -> bool {
        let url = format!("{server_url}health");
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check {} failed: {}", url, e);
                false
            }
        }
    }

    async fn ssh_endpoint(&self, instance_id: &str) -> Result<SshEndpoint, RemoteError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::Config("api_key is required for SSH lookup".into()))?;

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "query": POD_PORTS_QUERY,
                "variables": { "podId": instance_id },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let endpoint = ssh_from_response(instance_id, body)?;
        info!("SSH endpoint for {}: {}:{}", instance_id, endpoint.host, endpoint.port);
        Ok(endpoint)
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), RemoteError> {
        info!("Stopping pod {}", instance_id);
        self.runpodctl(&["stop", "pod", instance_id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GraphQlResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_ssh_port_lookup() {
        let response = parse(
            r#"{"data": {"pod": {"id": "p1", "name": "esrgan", "runtime": {"ports": [
                {"ip": "10.0.0.1", "isIpPublic": false, "privatePort": 5000, "publicPort": 5000, "type": "http"},
                {"ip": "203.0.113.9", "isIpPublic": true, "privatePort": 22, "publicPort": 40122, "type": "tcp"}
            ]}}}}"#,
        );

        let endpoint = ssh_from_response("p1", response).unwrap();
        assert_eq!(
            endpoint,
            SshEndpoint {
                host: "203.0.113.9".to_string(),
                port: 40122
            }
        );
    }

    #[test]
    fn test_missing_ssh_mapping() {
        let response = parse(r#"{"data": {"pod": {"runtime": {"ports": []}}}}"#);
        let err = ssh_from_response("p1", response).unwrap_err();
        assert!(matches!(err, RemoteError::SshEndpoint(_)));

        let stopped = parse(r#"{"data": {"pod": {"runtime": null}}}"#);
        assert!(ssh_from_response("p1", stopped).is_err());
    }

    #[test]
    fn test_graphql_errors() {
        let response = parse(r#"{"data": null, "errors": [{"message": "unauthorized"}]}"#);
        let err = ssh_from_response("p1", response).unwrap_err();
        assert!(err.to_string().contains("unauthorized"));
    }

    #[tokio::test]
    async fn test_ssh_lookup_requires_api_key() {
        let provider = RunPodProvider::new(RemoteConfig::default()).unwrap();
        let err = provider.ssh_endpoint("p1").await.unwrap_err();
        assert!(matches!(err, RemoteError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        let provider = RunPodProvider::new(RemoteConfig {
            request_timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();
        assert!(!provider.health("http://127.0.0.1:9/").await);
    }
}
