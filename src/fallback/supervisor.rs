//! Restart loop for the fallback tunnel
//!
//! The loop alternates between running the client and backing off for a
//! fixed delay. It never exits; a tunnel failure only ever costs a restart.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between a client exit and its restart
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// A long-running tunnel client
#[async_trait]
pub trait TunnelClient: Send + Sync {
    /// Run until the tunnel drops
    async fn run(&self) -> Result<()>;
}

/// Source of delays, swapped out in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Where the restart loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    /// Client should be (re)started
    Running,
    /// Waiting before the next start
    Backoff(Duration),
}

/// The `Running -> Backoff -> Running` loop, one transition per [`step`](Self::step)
pub struct SupervisedLoop {
    client: Arc<dyn TunnelClient>,
    sleeper: Arc<dyn Sleeper>,
    phase: SupervisorPhase,
    restarts: Arc<AtomicU64>,
}

impl SupervisedLoop {
    /// Loop starting in [`SupervisorPhase::Running`]
    pub fn new(client: Arc<dyn TunnelClient>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            sleeper,
            phase: SupervisorPhase::Running,
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    /// Counter of completed backoffs
    pub fn restarts(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.restarts)
    }

    /// Perform one transition and return the new phase
    pub async fn step(&mut self) -> SupervisorPhase {
        self.phase = match self.phase {
            SupervisorPhase::Running => {
                match self.client.run().await {
                    Ok(()) => info!("Fallback tunnel exited"),
                    Err(e) => warn!("Fallback tunnel failed: {}", e),
                }
                SupervisorPhase::Backoff(RESTART_DELAY)
            }
            SupervisorPhase::Backoff(delay) => {
                self.sleeper.sleep(delay).await;
                let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                info!(restarts, "Restarting fallback tunnel");
                SupervisorPhase::Running
            }
        };
        self.phase
    }

    /// Step forever
    pub async fn run_forever(mut self) {
        loop {
            self.step().await;
        }
    }
}

/// Starts the fallback tunnel at most once per process
#[derive(Debug, Default)]
pub struct TunnelSupervisor {
    started: AtomicBool,
}

impl TunnelSupervisor {
    /// Supervisor with nothing started
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a loop has been spawned
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawn the restart loop unless one is running; true if this call spawned it
    pub fn ensure_started(&self, client: Arc<dyn TunnelClient>) -> bool {
        self.ensure_started_with(client, Arc::new(TokioSleeper))
    }

    /// [`ensure_started`](Self::ensure_started) with an explicit sleeper
    pub fn ensure_started_with(
        &self,
        client: Arc<dyn TunnelClient>,
        sleeper: Arc<dyn Sleeper>,
    ) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!("Starting fallback tunnel supervisor");
        tokio::spawn(SupervisedLoop::new(client, sleeper).run_forever());
        true
    }
}
