//! Remote command execution against a target's bootstrap endpoint.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use drover_transport::{RequestOpts, RobustClient};

/// Result of one shell command on the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
}

impl ExecResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
        }
    }
}

/// Seam between the pipeline and the wire, so tests can script a target.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the target via its bootstrap `/execute`.
    /// Transport failures come back as a failed [`ExecResult`]; the
    /// pipeline treats them like any other failing command.
    async fn execute(&self, command: &str, working_dir: Option<&str>) -> ExecResult;

    /// Whether the target currently answers its health endpoint.
    async fn health(&self) -> bool;
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
}

/// Production executor: bearer-authenticated HTTP against the bootstrap
/// endpoint, with the robust client underneath.
pub struct HttpExecutor {
    client: RobustClient,
    base_url: String,
    token: String,
    command_timeout: Duration,
}

impl HttpExecutor {
    pub fn new(
        client: RobustClient,
        base_url: impl Into<String>,
        token: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            command_timeout,
        }
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, command: &str, working_dir: Option<&str>) -> ExecResult {
        let url = format!("{}/execute", self.base_url);
        let opts = RequestOpts::bearer(&self.token).with_timeout(self.command_timeout);
        let body = ExecuteBody {
            command,
            working_dir,
        };
        match self.client.post_json::<_, ExecResult>(&url, &body, &opts).await {
            Ok(result) => result,
            Err(e) => {
                debug!(%url, error = %e, "remote execute failed in transport");
                ExecResult::failure(format!("transport: {e}"))
            },
        }
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let opts = RequestOpts::default().with_timeout(Duration::from_secs(10));
        self.client
            .get_json::<serde_json::Value>(&url, &opts)
            .await
            .is_ok()
    }
}
