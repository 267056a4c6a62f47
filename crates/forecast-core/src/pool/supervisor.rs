//! Supervisor: keeps the configured number of agent slots alive
//!
//! Every agent task is paired with a monitor that reports its exit to the
//! watchdog loop. A slot whose current agent exits while the pool is running
//! is restarted with an empty partition after the minimum backoff. Restarts
//! are unlimited; a slot restarting too often within the crash-loop window
//! raises an operational alert and degrades the `pool` component. While no
//! agent is running at all the component is unhealthy.

use super::agent::{self, AgentContext, AgentHandle};
use super::balancer::LoadBalancer;
use crate::config::ForecastConfig;
use crate::health::{components, ComponentStatus};
use crate::sensor::SensorId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// Exit notice from a slot monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentExit {
    pub slot: usize,
    pub generation: u64,
    pub panicked: bool,
}

struct Slot {
    handle: AgentHandle,
    generation: u64,
    restarts: VecDeque<Instant>,
    alerted: bool,
}

pub struct Supervisor {
    context: AgentContext,
    restart_backoff: Duration,
    crash_loop_restarts: usize,
    crash_loop_window: Duration,
    slots: RwLock<Vec<Slot>>,
    generations: AtomicU64,
    stopping: AtomicBool,
    exits: mpsc::UnboundedSender<AgentExit>,
}

impl Supervisor {
    /// Start `config.agent_count` agents
    ///
    /// Returns the supervisor and the exit stream its watchdog consumes.
    pub async fn start(
        config: &ForecastConfig,
        context: AgentContext,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AgentExit>) {
        let (exits, exit_stream) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            context,
            restart_backoff: config.restart_backoff(),
            crash_loop_restarts: config.crash_loop_restarts.max(1),
            crash_loop_window: config.crash_loop_window(),
            slots: RwLock::new(Vec::new()),
            generations: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            exits,
        });

        {
            let mut slots = supervisor.slots.write().await;
            for slot in 0..config.agent_count.max(1) {
                let fresh = supervisor.spawn_slot(slot);
                slots.push(fresh);
            }
        }
        supervisor.report_live().await;
        supervisor.context.health.set_healthy(components::POOL).await;

        info!(agents = config.agent_count.max(1), "Agent pool started");
        (supervisor, exit_stream)
    }

    fn spawn_slot(&self, slot: usize) -> Slot {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let (handle, join) = agent::spawn(slot, self.context.clone(), agent::QUEUE_SIZE);

        let exits = self.exits.clone();
        tokio::spawn(async move {
            let panicked = match join.await {
                Ok(()) => false,
                Err(e) => e.is_panic(),
            };
            let _ = exits.send(AgentExit {
                slot,
                generation,
                panicked,
            });
        });

        Slot {
            handle,
            generation,
            restarts: VecDeque::new(),
            alerted: false,
        }
    }

    /// Watchdog loop: restarts crashed slots until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut exits: mpsc::UnboundedReceiver<AgentExit>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            backoff_ms = self.restart_backoff.as_millis() as u64,
            "Starting agent watchdog"
        );

        loop {
            tokio::select! {
                Some(exit) = exits.recv() => {
                    self.handle_exit(exit).await;
                }
                _ = shutdown.recv() => {
                    info!("Agent watchdog shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_exit(self: &Arc<Self>, exit: AgentExit) {
        self.report_live().await;
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        let current = {
            let slots = self.slots.read().await;
            slots
                .get(exit.slot)
                .map(|slot| slot.generation == exit.generation)
                .unwrap_or(false)
        };
        if !current {
            // Replaced or removed on purpose
            debug!(slot = exit.slot, generation = exit.generation, "Retired agent exited");
            return;
        }

        if self.active_children().await == 0 {
            self.context
                .health
                .set_unhealthy(components::POOL, "no live agents")
                .await;
        }

        warn!(
            slot = exit.slot,
            panicked = exit.panicked,
            "Agent terminated, scheduling restart"
        );

        let supervisor = Arc::clone(self);
        let backoff = self.restart_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if !supervisor.stopping.load(Ordering::SeqCst) {
                supervisor.restart_slot(exit.slot, Some(exit)).await;
            }
        });
    }

    async fn restart_slot(&self, slot: usize, cause: Option<AgentExit>) -> bool {
        let (generation, recent, alert) = {
            let mut slots = self.slots.write().await;
            let Some(existing) = slots.get(slot) else {
                return false;
            };
            // A newer agent already took over
            if let Some(exit) = cause {
                if existing.generation != exit.generation {
                    return false;
                }
            }

            let now = Instant::now();
            let mut restarts = existing.restarts.clone();
            restarts.push_back(now);
            while restarts
                .front()
                .map(|t| now.duration_since(*t) > self.crash_loop_window)
                .unwrap_or(false)
            {
                restarts.pop_front();
            }

            let mut fresh = self.spawn_slot(slot);
            let recent = restarts.len();
            let looping = recent >= self.crash_loop_restarts;
            let alert = looping && !existing.alerted;
            fresh.restarts = restarts;
            fresh.alerted = looping;
            let generation = fresh.generation;
            slots[slot] = fresh;

            (generation, recent, alert)
        };

        self.context.metrics.inc_agent_restarts();
        self.context.logger.log_agent_restart(
            slot,
            generation,
            cause.map(|c| c.panicked).unwrap_or(false),
        );

        if alert {
            self.context.logger.log_crash_loop(
                slot,
                recent,
                self.crash_loop_window.as_secs(),
            );
            self.context
                .health
                .set_degraded(
                    components::POOL,
                    format!("agent slot {} restarted {} times", slot, recent),
                )
                .await;
        } else if !self.any_alerted().await {
            self.context.health.set_healthy(components::POOL).await;
        } else if self.context.health.status(components::POOL).await
            == Some(ComponentStatus::Unhealthy)
        {
            self.context
                .health
                .set_degraded(components::POOL, "agents restarted after a crash loop")
                .await;
        }

        self.report_live().await;
        true
    }

    async fn any_alerted(&self) -> bool {
        self.slots.read().await.iter().any(|slot| slot.alerted)
    }

    async fn report_live(&self) {
        let live = self.active_children().await;
        self.context.metrics.set_live_agents(live as i64);
    }

    /// Number of slots whose agent is currently running
    pub async fn active_children(&self) -> usize {
        self.slots
            .read()
            .await
            .iter()
            .filter(|slot| !slot.handle.is_closed())
            .count()
    }

    /// Number of configured slots
    pub async fn children(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Ensure slots up to and including `slot` exist and are running
    pub async fn start_child(&self, slot: usize) {
        {
            let mut slots = self.slots.write().await;
            while slots.len() <= slot {
                let index = slots.len();
                let fresh = self.spawn_slot(index);
                slots.push(fresh);
            }
            if slots[slot].handle.is_closed() {
                let restarts = std::mem::take(&mut slots[slot].restarts);
                let mut fresh = self.spawn_slot(slot);
                fresh.restarts = restarts;
                slots[slot] = fresh;
            }
        }
        self.report_live().await;
    }

    /// Replace the agent in `slot` with a fresh one
    ///
    /// The previous agent flushes and stops once its queue drains.
    pub async fn restart_child(&self, slot: usize) -> bool {
        self.restart_slot(slot, None).await
    }

    /// Handle of the agent owning `id` under the current slot count
    pub async fn route(&self, id: &SensorId) -> AgentHandle {
        let slots = self.slots.read().await;
        let index = LoadBalancer::new(slots.len()).route(id);
        slots[index].handle.clone()
    }

    /// Routing under the current slot count
    pub async fn balancer(&self) -> LoadBalancer {
        LoadBalancer::new(self.slots.read().await.len())
    }

    /// Handles of every slot, in slot order
    pub async fn handles(&self) -> Vec<AgentHandle> {
        self.slots
            .read()
            .await
            .iter()
            .map(|slot| slot.handle.clone())
            .collect()
    }

    /// Grow or shrink to `count` slots
    ///
    /// Removed slots flush and stop; surviving slots flush and evict the
    /// sensors they no longer own, which their new owners fetch from the
    /// store on next access. Returns the number of evicted sensors.
    pub async fn resize(&self, count: usize) -> usize {
        let count = count.max(1);
        let removed: Vec<Slot> = {
            let mut slots = self.slots.write().await;
            let previous = slots.len();
            if previous == count {
                return 0;
            }
            while slots.len() < count {
                let index = slots.len();
                let fresh = self.spawn_slot(index);
                slots.push(fresh);
            }
            let removed = slots.split_off(count);
            info!(from = previous, to = count, "Resizing agent pool");
            removed
        };

        for slot in removed {
            if let Err(e) = slot.handle.shutdown().await {
                warn!(slot = slot.handle.slot(), error = %e, "Removed agent did not stop cleanly");
            }
        }

        let mut evicted = 0;
        for handle in self.handles().await {
            match handle.drain(count).await {
                Ok(n) => evicted += n,
                Err(e) => warn!(slot = handle.slot(), error = %e, "Drain failed"),
            }
        }

        self.report_live().await;
        evicted
    }

    /// Flush every agent and stop the pool
    ///
    /// Returns the number of sensors whose latest state could not be
    /// persisted.
    pub async fn shutdown(&self) -> usize {
        self.stopping.store(true, Ordering::SeqCst);
        let mut pending = 0;
        for handle in self.handles().await {
            match handle.shutdown().await {
                Ok(n) => pending += n,
                Err(e) => warn!(slot = handle.slot(), error = %e, "Agent did not stop cleanly"),
            }
        }
        info!(pending, "Agent pool stopped");
        pending
    }
}
