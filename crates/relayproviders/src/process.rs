use async_trait::async_trait;
use relaycore::{Parameters, Provider, ProviderError, ProviderHandle};
use relayruntime::{ProviderFactory, ProviderMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    operation: &'a str,
    parameters: &'a Parameters,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

struct Pipe {
    // Kept so the child is killed when the provider is dropped
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

/// Provider running as a child process, one JSON object per line each way.
///
/// Calls on one handle are serialized over the pipe.
pub struct ProcessProvider {
    name: String,
    operations: Vec<String>,
    pipe: Mutex<Pipe>,
}

#[async_trait]
impl Provider for ProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        parameters: Parameters,
    ) -> Result<serde_json::Value, ProviderError> {
        if !self.operations.iter().any(|op| op == operation) {
            return Err(ProviderError::UnknownOperation(operation.to_string()));
        }

        let mut pipe = self.pipe.lock().await;
        pipe.next_id += 1;
        let id = pipe.next_id;

        let mut line = serde_json::to_string(&Request {
            id,
            operation,
            parameters: &parameters,
        })
        .map_err(|e| ProviderError::InvalidParameters {
            field: "parameters".to_string(),
            reason: e.to_string(),
        })?;
        line.push('\n');

        pipe.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProviderError::ExecutionFailed(format!("write to {} failed: {}", self.name, e)))?;
        pipe.stdin
            .flush()
            .await
            .map_err(|e| ProviderError::ExecutionFailed(format!("write to {} failed: {}", self.name, e)))?;

        loop {
            let reply = pipe
                .stdout
                .next_line()
                .await
                .map_err(|e| ProviderError::ExecutionFailed(format!("read from {} failed: {}", self.name, e)))?
                .ok_or_else(|| ProviderError::ExecutionFailed(format!("{} exited", self.name)))?;

            let response: Response = match serde_json::from_str(&reply) {
                Ok(response) => response,
                Err(_) => {
                    tracing::debug!(provider = %self.name, "skipping non-protocol output: {}", reply);
                    continue;
                }
            };
            if response.id != id {
                tracing::warn!(provider = %self.name, "discarding reply for request {}", response.id);
                continue;
            }

            return match (response.result, response.error) {
                (_, Some(error)) => Err(ProviderError::ExecutionFailed(error)),
                (Some(result), None) => Ok(result),
                (None, None) => Err(ProviderError::ExecutionFailed(format!(
                    "{} sent a reply with neither result nor error",
                    self.name
                ))),
            };
        }
    }
}

pub struct ProcessProviderFactory {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub operations: Vec<String>,
}

#[async_trait]
impl ProviderFactory for ProcessProviderFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn connect(&self) -> Result<ProviderHandle, ProviderError> {
        tracing::info!(provider = %self.name, "spawning {} {:?}", self.command, self.args);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::ConnectionFailed(format!("cannot spawn {}: {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::ConnectionFailed("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::ConnectionFailed("child stdout unavailable".to_string()))?;

        Ok(Arc::new(ProcessProvider {
            name: self.name.clone(),
            operations: self.operations.clone(),
            pipe: Mutex::new(Pipe {
                _child: child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 0,
            }),
        }))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            description: format!("process `{}`", self.command),
            transport: "process".to_string(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_factory(script: &str) -> ProcessProviderFactory {
        ProcessProviderFactory {
            name: "shell".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
            operations: vec!["ping".to_string()],
        }
    }

    #[tokio::test]
    async fn round_trips_requests() {
        // Answers every request by splicing a result in front of "operation"
        let provider = shell_factory(
            r#"while read -r line; do printf '%s\n' "$line" | sed 's/"operation"/"result":"pong","operation"/'; done"#,
        )
        .connect()
        .await
        .unwrap();

        for _ in 0..2 {
            let result = provider.invoke("ping", Parameters::new()).await.unwrap();
            assert_eq!(result, json!("pong"));
        }
    }

    #[tokio::test]
    async fn error_replies_become_provider_errors() {
        let provider = shell_factory(
            r#"while read -r line; do printf '%s\n' "$line" | sed 's/"operation"/"error":"boom","operation"/'; done"#,
        )
        .connect()
        .await
        .unwrap();

        let err = provider.invoke("ping", Parameters::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ExecutionFailed(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn exited_process_is_reported() {
        let provider = shell_factory("exit 0").connect().await.unwrap();
        let err = provider.invoke("ping", Parameters::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn missing_binary_fails_connect() {
        let factory = ProcessProviderFactory {
            command: "/nonexistent/relay-provider".to_string(),
            ..shell_factory("")
        };
        assert!(matches!(
            factory.connect().await.err().unwrap(),
            ProviderError::ConnectionFailed(_)
        ));
    }
}
