use crate::error::{ProviderError, Result};
use crate::policy::ResponsePolicy;
use crate::surface::ChatSurface;
use async_trait::async_trait;
use std::time::Instant;

/// Turns a prompt into a generated reply. Single-capacity by
/// construction: the dispatcher never overlaps calls, and no
/// implementation here supports concurrent use.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completion provider over a [`ChatSurface`], using a bounded polling
/// loop with a stability window: submit the prompt, then check the
/// rendered output every `check_interval`; once it is non-empty and
/// unchanged for `stability_count` consecutive checks, it is the reply.
pub struct SurfaceProvider<S> {
    surface: S,
    policy: ResponsePolicy,
}

impl<S: ChatSurface> SurfaceProvider<S> {
    pub fn new(surface: S, policy: ResponsePolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { surface, policy })
    }

    async fn wait_for_stable_reply(&self, started: Instant) -> Result<String> {
        let mut last_text: Option<String> = None;
        let mut stable_checks = 0u32;
        let mut polls = 0usize;

        loop {
            if started.elapsed() >= self.policy.timeout {
                tracing::error!(
                    polls,
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "timed out waiting for chat surface reply"
                );
                return Err(ProviderError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.policy.check_interval).await;
            polls = polls.saturating_add(1);

            let Some(current) = self.surface.observe().await? else {
                stable_checks = 0;
                continue;
            };
            let current = current.trim().to_string();

            if !current.is_empty() && last_text.as_deref() == Some(current.as_str()) {
                stable_checks += 1;
                if stable_checks >= self.policy.stability_count {
                    tracing::debug!(
                        polls,
                        latency_ms = started.elapsed().as_millis() as u64,
                        reply_len = current.len(),
                        "chat surface reply stabilized"
                    );
                    return Ok(current);
                }
            } else {
                stable_checks = 0;
            }
            last_text = Some(current);
        }
    }
}

#[async_trait]
impl<S: ChatSurface> CompletionProvider for SurfaceProvider<S> {
    #[tracing::instrument(level = "info", skip_all, fields(prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        // The automation target rejects supplementary-plane characters
        // (emoji and the like) in the input box.
        let prompt = strip_supplementary_plane(prompt);
        let started = Instant::now();
        // Outer timeout covers submit and every observe call: a wedged
        // harness that never returns from a single call must not hold
        // the dispatcher past the policy deadline.
        let reply = tokio::time::timeout(self.policy.timeout, async {
            self.surface.submit(&prompt).await?;
            self.wait_for_stable_reply(started).await
        })
        .await
        .unwrap_or_else(|_elapsed| {
            tracing::error!(
                timeout_ms = self.policy.timeout.as_millis() as u64,
                "chat surface call exceeded the policy deadline"
            );
            Err(ProviderError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
        })?;
        if reply.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(reply)
    }
}

fn strip_supplementary_plane(text: &str) -> String {
    text.chars().filter(|c| (*c as u32) < 0x10000).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted surface: each `observe` call pops the next observation.
    /// The script's last entry repeats once exhausted.
    struct ScriptedSurface {
        observations: Mutex<Vec<Option<String>>>,
        submitted: Mutex<Vec<String>>,
    }

    impl ScriptedSurface {
        fn new(script: &[Option<&str>]) -> Self {
            let mut observations: Vec<Option<String>> =
                script.iter().map(|o| o.map(str::to_string)).collect();
            observations.reverse();
            Self {
                observations: Mutex::new(observations),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatSurface for ScriptedSurface {
        async fn submit(&self, prompt: &str) -> Result<()> {
            self.submitted.lock().unwrap().push(prompt.to_string());
            Ok(())
        }

        async fn observe(&self) -> Result<Option<String>> {
            let mut observations = self.observations.lock().unwrap();
            if observations.len() > 1 {
                Ok(observations.pop().unwrap())
            } else {
                Ok(observations.first().cloned().unwrap_or(None))
            }
        }
    }

    fn fast_policy(stability_count: u32, timeout_ms: u64) -> ResponsePolicy {
        ResponsePolicy {
            check_interval: Duration::from_millis(1),
            stability_count,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn reply_is_accepted_once_stable() {
        let surface = ScriptedSurface::new(&[
            None,
            Some("Hel"),
            Some("Hello the"),
            Some("Hello there"),
            Some("Hello there"),
            Some("Hello there"),
            Some("Hello there"),
        ]);
        let provider = SurfaceProvider::new(surface, fast_policy(3, 5_000)).unwrap();
        let reply = provider.complete("hi").await.expect("stable reply");
        assert_eq!(reply, "Hello there");
    }

    #[tokio::test]
    async fn changing_output_resets_the_window() {
        // Two stable checks, a change, then stability again: the reply
        // must be the post-change text.
        let surface = ScriptedSurface::new(&[
            Some("draft"),
            Some("draft"),
            Some("draft"),
            Some("final answer"),
            Some("final answer"),
            Some("final answer"),
            Some("final answer"),
        ]);
        let provider = SurfaceProvider::new(surface, fast_policy(3, 5_000)).unwrap();
        let reply = provider.complete("hi").await.expect("reply");
        assert_eq!(reply, "final answer");
    }

    #[tokio::test]
    async fn never_rendering_reply_times_out() {
        let surface = ScriptedSurface::new(&[None]);
        let provider = SurfaceProvider::new(surface, fast_policy(3, 20)).unwrap();
        let err = provider.complete("hi").await.expect_err("must time out");
        assert!(matches!(err, ProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn hanging_observe_still_times_out() {
        // A wedged harness call must not outlive the policy deadline.
        struct WedgedSurface;

        #[async_trait]
        impl ChatSurface for WedgedSurface {
            async fn submit(&self, _prompt: &str) -> Result<()> {
                Ok(())
            }
            async fn observe(&self) -> Result<Option<String>> {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(None)
            }
        }

        let provider = SurfaceProvider::new(WedgedSurface, fast_policy(3, 50)).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), provider.complete("hi"))
            .await
            .expect("complete must return by the policy deadline");
        assert!(matches!(outcome, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn hanging_submit_still_times_out() {
        struct WedgedSubmit;

        #[async_trait]
        impl ChatSurface for WedgedSubmit {
            async fn submit(&self, _prompt: &str) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            }
            async fn observe(&self) -> Result<Option<String>> {
                Ok(None)
            }
        }

        let provider = SurfaceProvider::new(WedgedSubmit, fast_policy(3, 50)).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), provider.complete("hi"))
            .await
            .expect("complete must return by the policy deadline");
        assert!(matches!(outcome, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn supplementary_plane_chars_are_stripped_from_prompt() {
        let surface = ScriptedSurface::new(&[Some("ok"), Some("ok"), Some("ok"), Some("ok")]);
        let provider = SurfaceProvider::new(surface, fast_policy(3, 5_000)).unwrap();
        provider.complete("hi \u{1F600} there").await.expect("reply");
        let submitted = provider.surface.submitted.lock().unwrap();
        assert_eq!(submitted.as_slice(), ["hi  there"]);
    }

    #[tokio::test]
    async fn surface_failure_propagates() {
        struct BrokenSurface;

        #[async_trait]
        impl ChatSurface for BrokenSurface {
            async fn submit(&self, _prompt: &str) -> Result<()> {
                Err(ProviderError::Surface("input box not found".to_string()))
            }
            async fn observe(&self) -> Result<Option<String>> {
                Ok(None)
            }
        }

        let provider = SurfaceProvider::new(BrokenSurface, fast_policy(3, 1_000)).unwrap();
        let err = provider.complete("hi").await.expect_err("submit fails");
        assert!(matches!(err, ProviderError::Surface(_)));
    }
}
