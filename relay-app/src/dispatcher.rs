//! Queue dispatcher: drains pending messages one at a time through the
//! single-capacity completion provider.
//!
//! One consumer task owns the loop; everything else only triggers it.
//! That structure, not luck, is what keeps at most one provider call in
//! flight system-wide.

use crate::prompt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_provider::CompletionProvider;
use relay_store::{QueueItem, SenderKey, Storage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Injected egress function: delivers a generated reply back to the
/// originating sender.
#[async_trait]
pub trait Egress: Send + Sync {
    async fn deliver(&self, sender: &SenderKey, text: &str) -> Result<()>;
}

/// How a dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Queue empty; back to idle.
    Drained,
    /// A provider or egress failure; the offending record stays queued
    /// and the loop stops until the next trigger.
    Aborted,
    /// A cycle was already running; this call did nothing.
    AlreadyRunning,
}

pub struct Dispatcher {
    storage: Arc<Storage>,
    provider: Arc<dyn CompletionProvider>,
    egress: Arc<dyn Egress>,
    system_prompt: String,
    /// Fairness delay between items; not a correctness requirement.
    idle_delay: Duration,
    running: AtomicBool,
}

/// Trigger handle for the dispatcher task. `Notify` coalesces triggers
/// and holds a permit when nothing is waiting, so a trigger that lands
/// mid-cycle guarantees one more cycle after the current one ends.
#[derive(Clone)]
pub struct DispatchHandle {
    notify: Arc<Notify>,
}

impl DispatchHandle {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

impl Dispatcher {
    pub fn new(
        storage: Arc<Storage>,
        provider: Arc<dyn CompletionProvider>,
        egress: Arc<dyn Egress>,
        system_prompt: String,
        idle_delay: Duration,
    ) -> Self {
        Self {
            storage,
            provider,
            egress,
            system_prompt,
            idle_delay,
            running: AtomicBool::new(false),
        }
    }

    /// Spawns the single consumer task. A non-empty queue at startup
    /// counts as a trigger, so messages left over from a crash are
    /// dispatched without waiting for new traffic.
    pub fn spawn(self: Arc<Self>) -> DispatchHandle {
        let notify = Arc::new(Notify::new());
        let handle = DispatchHandle {
            notify: notify.clone(),
        };

        let startup_pending = match self.storage.queue.pending() {
            Ok(n) => n,
            Err(error) => {
                tracing::error!(%error, "could not count queued records at startup");
                0
            }
        };
        if startup_pending > 0 {
            tracing::info!(pending = startup_pending, "queued records found at startup");
            notify.notify_one();
        }

        tokio::spawn(async move {
            loop {
                notify.notified().await;
                self.run_cycle().await;
            }
        });
        handle
    }

    /// One dispatch cycle: `Idle -> Running -> Idle`. Re-entrant calls
    /// are refused via the checked-and-set running flag.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("dispatch cycle already running; trigger ignored");
            return CycleOutcome::AlreadyRunning;
        }
        tracing::info!("dispatch cycle started");
        let outcome = self.drain().await;
        self.running.store(false, Ordering::Release);
        tracing::info!(outcome = ?outcome, "dispatch cycle ended");
        outcome
    }

    async fn drain(&self) -> CycleOutcome {
        loop {
            let item = match self.storage.queue.peek_oldest() {
                Ok(Some(item)) => item,
                Ok(None) => return CycleOutcome::Drained,
                Err(error) => {
                    tracing::error!(%error, "queue peek failed; aborting cycle");
                    return CycleOutcome::Aborted;
                }
            };

            if let Err(error) = self.process(&item).await {
                // The record stays in place for retry on the next
                // trigger; a stuck dependency halts the whole loop
                // rather than reordering around the failure.
                tracing::warn!(
                    sender = %item.sender,
                    record = %item.record_name(),
                    %error,
                    "dispatch failed; leaving record queued for retry"
                );
                return CycleOutcome::Aborted;
            }

            tokio::time::sleep(self.idle_delay).await;
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(sender = %item.sender))]
    async fn process(&self, item: &QueueItem) -> Result<()> {
        let history = self
            .storage
            .history
            .read(&item.sender)
            .context("read history")?;
        let prompt = prompt::build_prompt(&self.system_prompt, &history, &item.message);

        // Sole suspension point: one provider call in flight, ever.
        let started = Instant::now();
        let reply = self
            .provider
            .complete(&prompt)
            .await
            .context("completion provider")?;
        tracing::info!(
            latency_ms = started.elapsed().as_millis() as u64,
            reply_len = reply.len(),
            "completion received"
        );

        // User turn before assistant turn, preserving causal order for
        // future prompts even though this completion used the
        // pre-append history.
        self.storage
            .history
            .append_user(&item.sender, &item.message)
            .context("append user turn")?;
        self.storage
            .history
            .append_assistant(&item.sender, &reply)
            .context("append assistant turn")?;

        // If delivery fails the assistant turn above is retained; the
        // retry recomputes from a history that already contains the
        // undelivered reply. See DESIGN.md.
        self.egress
            .deliver(&item.sender, &reply)
            .await
            .context("egress send")?;

        self.storage.queue.remove(item).context("remove queue record")?;
        tracing::info!("reply delivered and record consumed");
        Ok(())
    }
}
