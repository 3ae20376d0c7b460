use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Seam to the browser-automation harness driving the chat UI.
///
/// `submit` types a prompt into the surface; `observe` returns the
/// latest assistant output currently visible, `None` until the reply
/// starts rendering. Both may be slow; neither is ever called
/// concurrently by this crate's provider.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<()>;
    async fn observe(&self) -> Result<Option<String>>;
}

/// `ChatSurface` over two configured argv commands, so the actual
/// Selenium/Playwright harness stays an external script. The submit
/// command receives the prompt on stdin; the observe command prints the
/// currently rendered assistant output to stdout (empty output means
/// nothing rendered yet).
pub struct CommandSurface {
    submit_argv: Vec<String>,
    observe_argv: Vec<String>,
}

impl CommandSurface {
    pub fn new(submit_argv: Vec<String>, observe_argv: Vec<String>) -> Result<Self> {
        if submit_argv.is_empty() || observe_argv.is_empty() {
            return Err(ProviderError::Surface(
                "surface submit and observe commands are required".to_string(),
            ));
        }
        Ok(Self {
            submit_argv,
            observe_argv,
        })
    }

    fn command(argv: &[String]) -> Command {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }
}

#[async_trait]
impl ChatSurface for CommandSurface {
    async fn submit(&self, prompt: &str) -> Result<()> {
        let mut child = Self::command(&self.submit_argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProviderError::Surface(format!("spawn submit command: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ProviderError::Surface(format!("write prompt to harness: {e}")))?;
            // Dropping stdin closes the pipe so the harness sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProviderError::Surface(format!("wait for submit command: {e}")))?;
        if !output.status.success() {
            return Err(ProviderError::Surface(format!(
                "submit command failed: status={} stderr={}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn observe(&self) -> Result<Option<String>> {
        let output = Self::command(&self.observe_argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProviderError::Surface(format!("run observe command: {e}")))?;
        if !output.status.success() {
            return Err(ProviderError::Surface(format!(
                "observe command failed: status={} stderr={}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}
