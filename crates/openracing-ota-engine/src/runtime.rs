//! Owned-task driver for [`OtaAgent`].
//!
//! The agent, its transport and its listener move into one tokio task. Ticks
//! come from an interval and inbound messages arrive over a channel, so every
//! session mutation happens on that task.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::agent::OtaAgent;
use crate::controller::UpdateListener;
use crate::error::{OtaError, OtaResult};
use crate::sink::FirmwareSink;
use crate::transport::Transport;

const EVENT_QUEUE_DEPTH: usize = 64;

/// Input to the agent task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// An inbound transport message
    Message {
        /// Topic the message arrived on
        topic: String,
        /// Raw payload
        payload: Vec<u8>,
    },
    /// The transport reported a disconnect; poll immediately.
    Disconnected,
    /// Stop the task.
    Shutdown,
}

/// Everything the task owned, handed back on shutdown.
#[derive(Debug)]
pub struct AgentParts<S, T, L> {
    /// The agent
    pub agent: OtaAgent<S>,
    /// The transport
    pub transport: T,
    /// The listener
    pub listener: L,
}

/// Handle to a running agent task.
pub struct OtaTaskHandle<S, T, L> {
    events: mpsc::Sender<OtaEvent>,
    task: JoinHandle<AgentParts<S, T, L>>,
}

impl<S, T, L> fmt::Debug for OtaTaskHandle<S, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtaTaskHandle")
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

/// Move `agent` into its own task, polling it every `tick_interval`.
///
/// # Errors
///
/// Returns [`OtaError::InvalidConfiguration`] for a zero interval and
/// [`OtaError::TaskStopped`] when called outside a tokio runtime.
pub fn spawn_agent<S, T, L>(
    agent: OtaAgent<S>,
    transport: T,
    listener: L,
    tick_interval: Duration,
) -> OtaResult<OtaTaskHandle<S, T, L>>
where
    S: FirmwareSink + Send + 'static,
    T: Transport + Send + 'static,
    L: UpdateListener + Send + 'static,
{
    if tick_interval.is_zero() {
        return Err(OtaError::invalid_configuration(
            "tick_interval must be greater than 0",
        ));
    }
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| OtaError::TaskStopped(format!("no tokio runtime: {e}")))?;

    let (events, inbox) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let task = runtime.spawn(run_agent(agent, transport, listener, inbox, tick_interval));
    Ok(OtaTaskHandle { events, task })
}

impl<S, T, L> OtaTaskHandle<S, T, L> {
    /// Deliver an inbound message to the agent.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TaskStopped`] if the task has exited.
    pub async fn deliver(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> OtaResult<()> {
        self.send(OtaEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
    }

    /// Tell the agent the transport dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TaskStopped`] if the task has exited.
    pub async fn disconnected(&self) -> OtaResult<()> {
        self.send(OtaEvent::Disconnected).await
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and take back the agent, transport and listener.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TaskStopped`] if the task panicked or was
    /// cancelled.
    pub async fn shutdown(self) -> OtaResult<AgentParts<S, T, L>> {
        if self.events.send(OtaEvent::Shutdown).await.is_err() {
            debug!("OTA agent task already stopped");
        }
        drop(self.events);
        self.task
            .await
            .map_err(|e| OtaError::TaskStopped(e.to_string()))
    }

    async fn send(&self, event: OtaEvent) -> OtaResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|e| OtaError::TaskStopped(format!("event not delivered: {e}")))
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn run_agent<S, T, L>(
    mut agent: OtaAgent<S>,
    mut transport: T,
    mut listener: L,
    mut inbox: mpsc::Receiver<OtaEvent>,
    tick_interval: Duration,
) -> AgentParts<S, T, L>
where
    S: FirmwareSink,
    T: Transport,
    L: UpdateListener,
{
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        tick_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
        "OTA agent task started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                agent.poll(&mut transport, &mut listener, now());
            }
            event = inbox.recv() => {
                match event {
                    Some(OtaEvent::Message { topic, payload }) => {
                        let result =
                            agent.handle_message(&mut transport, &mut listener, &topic, &payload, now());
                        if let Err(e) = result {
                            warn!(topic = %topic, error = %e, "Inbound OTA message refused");
                        }
                    }
                    Some(OtaEvent::Disconnected) => {
                        agent.poll(&mut transport, &mut listener, now());
                    }
                    Some(OtaEvent::Shutdown) | None => break,
                }
            }
        }
    }

    info!("OTA agent task stopped");
    AgentParts {
        agent,
        transport,
        listener,
    }
}
