//! Agent session
//!
//! An agent registers once, then runs one reporter per configured task.
//! Reporters share nothing but read-only configuration; a reporter whose
//! probe fails fatally stops on its own while the others keep going.

mod alert;
mod link;
mod reporter;


pub use crate::config::AgentTuning;
pub use alert::AlertSender;
pub use link::DatagramLink;
pub use reporter::{CycleOutcome, Reporter};

use crate::error::SessionError;
use crate::models::{AgentId, Task};
use crate::observability::StructuredLogger;
use crate::probe::Measurement;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle of an agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registering,
    Registered,
    Reporting,
    Terminated,
}

/// How the reporting phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub tasks_started: usize,
    /// Reporters that stopped on a probe failure
    pub tasks_failed: usize,
}

pub struct AgentSession {
    agent_id: AgentId,
    tasks: Vec<Task>,
    collector: SocketAddr,
    alert_endpoint: SocketAddr,
    probe: Arc<dyn Measurement>,
    tuning: AgentTuning,
    state: SessionState,
    logger: StructuredLogger,
}

impl AgentSession {
    pub fn new(
        agent_id: AgentId,
        tasks: Vec<Task>,
        collector: SocketAddr,
        alert_endpoint: SocketAddr,
        probe: Arc<dyn Measurement>,
        tuning: AgentTuning,
    ) -> Self {
        Self {
            agent_id,
            tasks,
            collector,
            alert_endpoint,
            probe,
            tuning,
            state: SessionState::Unregistered,
            logger: StructuredLogger::new("agent"),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Perform the REGISTER handshake with bounded retries
    pub async fn register(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Registering;
        info!(agent_id = self.agent_id, collector = %self.collector, "Registering with collector");

        let result = async {
            let link = DatagramLink::connect(self.collector, self.agent_id).await?;
            link.register(self.tuning.registration_timeout, self.tuning.registration_attempts)
                .await
        }
        .await;

        match result {
            Ok(attempts) => {
                self.state = SessionState::Registered;
                self.logger.log_registered(self.agent_id, attempts);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Terminated;
                error!(agent_id = self.agent_id, error = %e, "Registration failed");
                Err(e)
            }
        }
    }

    /// Start one reporter per task; each stops when `shutdown` fires
    pub async fn spawn_reporters(
        &mut self,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Vec<JoinHandle<Result<(), crate::error::ProbeError>>>, SessionError> {
        let alerts = AlertSender::new(self.alert_endpoint, self.tuning.alert_timeout);
        let mut handles = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let link = DatagramLink::connect(self.collector, self.agent_id).await?;
            let reporter = Reporter::new(
                task.clone(),
                link,
                self.probe.clone(),
                alerts.clone(),
                self.tuning.clone(),
            );
            handles.push(tokio::spawn(reporter.run(shutdown.subscribe())));
        }

        self.state = SessionState::Reporting;
        Ok(handles)
    }

    /// Register, report until shutdown, then wait for every reporter to stop
    ///
    /// The shutdown receiver is taken before the returned future first runs,
    /// so a signal sent while registering is never lost.
    pub fn run(
        mut self,
        shutdown: broadcast::Sender<()>,
    ) -> impl Future<Output = Result<SessionSummary, SessionError>> + Send {
        let mut stop = shutdown.subscribe();
        async move {
            let registered = tokio::select! {
                result = self.register() => Some(result),
                _ = stop.recv() => None,
            };
            match registered {
                Some(result) => result?,
                None => {
                    self.state = SessionState::Terminated;
                    self.logger.log_shutdown("shutdown during registration");
                    return Ok(SessionSummary::default());
                }
            }

            if self.tasks.is_empty() {
                warn!(agent_id = self.agent_id, "No tasks configured for this agent");
            }

            let handles = self.spawn_reporters(&shutdown).await?;
            // Reporters subscribed while their links were connecting may have
            // missed the signal; `stop` has seen it either way.
            if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                let _ = shutdown.send(());
            }

            let mut summary = SessionSummary {
                tasks_started: handles.len(),
                tasks_failed: 0,
            };

            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => summary.tasks_failed += 1,
                    Err(e) => {
                        error!(agent_id = self.agent_id, error = %e, "Reporter task panicked");
                        summary.tasks_failed += 1;
                    }
                }
            }

            self.state = SessionState::Terminated;
            self.logger.log_shutdown("reporters stopped");
            Ok(summary)
        }
    }
}
