//! Ordered startup and teardown of the bridge.
//!
//! Startup: spawn the server (spawn mode only) → connect → announce readiness
//! on the bus → start the outbound task.
//!
//! Teardown: close the connection (unblocks the outbound read) → terminate
//! the owned server process → join the outbound task within a bound → drain
//! the registry and fail every abandoned request on the bus.

mod shutdown_timeout;
mod state;

pub use shutdown_timeout::ShutdownTimeout;
pub use state::LifecycleState;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::bridge::actor::{InboundBridge, OutboundExit, OutboundTaskHandle, spawn_outbound_task};
use crate::bridge::bus::{BusSink, BusSource, Delivery};
use crate::bridge::connection::{ConnectTimeout, ConnectionManager, ConnectionState};
use crate::bridge::process::ServerProcess;
use crate::bridge::protocol::{Message, ResponseError};
use crate::bridge::registry::{PendingRequest, RequestRegistry};
use crate::config::{BridgeSettings, ServerMode};
use crate::error::{BridgeError, BridgeResult};

/// Default wait of one inbound poll cycle in `run`.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch a local language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub workspace: Option<PathBuf>,
}

/// Outcome of `stop()`.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Requests that never got a response, oldest first.
    pub abandoned: Vec<PendingRequest>,
    /// Why the outbound loop ended, if it was joined.
    pub outbound_exit: Option<OutboundExit>,
    /// Exit code of the owned server process.
    pub server_exit_code: Option<i32>,
    /// The outbound task had to be aborted.
    pub forced: bool,
}

/// Drives the bridge through its lifecycle.
pub struct LifecycleController<S, K> {
    state: LifecycleState,
    connection: ConnectionManager,
    launch: Option<ServerLaunch>,
    shutdown_timeout: ShutdownTimeout,
    poll_timeout: Duration,
    registry: Arc<RequestRegistry>,
    sink: K,
    /// Handed to the inbound bridge by `start()`
    source: Option<S>,
    inbound: Option<InboundBridge<S>>,
    outbound: Option<OutboundTaskHandle>,
    process: Option<ServerProcess>,
}

impl<S: BusSource, K: BusSink> LifecycleController<S, K> {
    /// Controller attaching to an externally managed server.
    pub fn new(connection: ConnectionManager, source: S, sink: K) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            connection,
            launch: None,
            shutdown_timeout: ShutdownTimeout::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            registry: Arc::new(RequestRegistry::new()),
            sink,
            source: Some(source),
            inbound: None,
            outbound: None,
            process: None,
        }
    }

    /// Build a controller from validated settings.
    ///
    /// # Errors
    /// `Io` (InvalidInput) if a timeout is out of range.
    pub fn from_settings(settings: &BridgeSettings, source: S, sink: K) -> BridgeResult<Self> {
        let connect_timeout =
            ConnectTimeout::new(Duration::from_millis(settings.connect_timeout_ms))?;
        let shutdown_timeout =
            ShutdownTimeout::new(Duration::from_millis(settings.shutdown_timeout_ms))?;
        let connection =
            ConnectionManager::new(settings.host.clone(), settings.port, connect_timeout);

        let mut controller = Self::new(connection, source, sink)
            .with_shutdown_timeout(shutdown_timeout)
            .with_poll_timeout(Duration::from_millis(settings.poll_timeout_ms));

        if settings.server_mode == ServerMode::Spawn {
            controller = controller.with_server(ServerLaunch {
                command: settings.server.command.clone(),
                args: settings.server_args(),
                workspace: Some(settings.workspace.clone()),
            });
        }
        Ok(controller)
    }

    /// Spawn and own the server process during `start()`.
    pub fn with_server(mut self, launch: ServerLaunch) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: ShutdownTimeout) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Bring the bridge up.
    ///
    /// # Errors
    /// `Startup { step, source }` naming the first failing step. Everything
    /// created before the failure is released and the controller ends in
    /// `Stopped`. Calling `start()` twice fails without changing state.
    pub async fn start(&mut self) -> BridgeResult<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(BridgeError::startup(
                "start",
                BridgeError::invalid_state(format!("cannot start from {:?}", self.state)),
            ));
        }
        self.state = LifecycleState::Starting;
        info!(target: "tsunagi::lifecycle", "Starting bridge to {}", self.connection.address());

        match self.run_startup_steps().await {
            Ok(()) => {
                self.state = LifecycleState::Ready;
                info!(target: "tsunagi::lifecycle", "Ready to receive requests");
                Ok(())
            }
            Err(e) => {
                error!(target: "tsunagi::lifecycle", "Startup failed: {}", e);
                self.release_partial().await;
                self.state = LifecycleState::Stopped;
                Err(e)
            }
        }
    }

    async fn run_startup_steps(&mut self) -> BridgeResult<()> {
        if let Some(launch) = &self.launch {
            let process = ServerProcess::spawn(
                &launch.command,
                &launch.args,
                launch.workspace.as_deref(),
            )
            .map_err(|e| BridgeError::startup("spawn", e))?;
            self.process = Some(process);
        }

        let (reader, writer) = self
            .connection
            .connect()
            .await
            .map_err(|e| BridgeError::startup("connect", e))?;

        self.sink
            .publish(Delivery::Ready)
            .await
            .map_err(|e| BridgeError::startup("announce", e))?;

        let source = self.source.take().ok_or_else(|| {
            BridgeError::startup("listen", BridgeError::invalid_state("bus source already taken"))
        })?;
        self.inbound = Some(InboundBridge::new(source, writer, Arc::clone(&self.registry)));
        self.outbound = Some(spawn_outbound_task(
            reader,
            Arc::clone(&self.registry),
            self.sink.clone(),
        ));
        Ok(())
    }

    async fn release_partial(&mut self) {
        self.connection.close();
        self.inbound = None;
        if let Some(process) = self.process.take() {
            if let Err(e) = process.terminate().await {
                warn!(target: "tsunagi::lifecycle", "Failed to stop language server: {}", e);
            }
        }
    }

    /// Run one inbound poll cycle.
    ///
    /// # Errors
    /// `InvalidState` unless `Ready`; otherwise as `InboundBridge::listen`.
    pub async fn listen(&mut self, poll_timeout: Duration) -> BridgeResult<usize> {
        match (self.state, self.inbound.as_mut()) {
            (LifecycleState::Ready, Some(inbound)) => inbound.listen(poll_timeout).await,
            (state, _) => Err(BridgeError::invalid_state(format!(
                "cannot listen from {:?}",
                state
            ))),
        }
    }

    /// Forward bus traffic until `shutdown` fires, the server goes away, or
    /// forwarding fails; then stop.
    ///
    /// # Errors
    /// The fatal inbound error, after teardown has completed.
    pub async fn run(&mut self, shutdown: CancellationToken) -> BridgeResult<ShutdownReport> {
        let poll_timeout = self.poll_timeout;
        let outcome = match (self.state, self.inbound.as_mut(), self.outbound.as_ref()) {
            (LifecycleState::Ready, Some(inbound), Some(outbound)) => loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!(target: "tsunagi::lifecycle", "Shutdown requested");
                        break Ok(());
                    }
                    _ = outbound.terminated() => {
                        info!(target: "tsunagi::lifecycle", "Language server connection ended");
                        break Ok(());
                    }
                    result = inbound.listen(poll_timeout) => match result {
                        Ok(_) => {}
                        Err(BridgeError::Bus { message }) => {
                            info!(target: "tsunagi::lifecycle", "Bus ended: {}", message);
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    },
                }
            },
            (state, _, _) => {
                return Err(BridgeError::invalid_state(format!(
                    "cannot run from {:?}",
                    state
                )));
            }
        };

        let report = self.stop().await?;
        outcome.map(|()| report)
    }

    /// Tear the bridge down.
    ///
    /// Idempotent: once stopped, further calls return an empty report.
    pub async fn stop(&mut self) -> BridgeResult<ShutdownReport> {
        if !self.state.needs_teardown() {
            if self.state == LifecycleState::Uninitialized {
                self.state = LifecycleState::Stopped;
            }
            debug!(target: "tsunagi::lifecycle", "stop() in {:?}, nothing to do", self.state);
            return Ok(ShutdownReport::default());
        }

        self.state = LifecycleState::Stopping;
        info!(target: "tsunagi::lifecycle", "Stopping bridge");
        let mut report = ShutdownReport::default();

        self.connection.close();
        self.inbound = None;

        if let Some(process) = self.process.take() {
            match process.terminate().await {
                Ok(code) => report.server_exit_code = code,
                Err(e) => warn!(target: "tsunagi::lifecycle", "Failed to stop language server: {}", e),
            }
        }

        if let Some(outbound) = self.outbound.take() {
            match outbound.join(self.shutdown_timeout.as_duration()).await {
                Ok(exit) => report.outbound_exit = Some(exit),
                Err(e) => {
                    warn!(target: "tsunagi::lifecycle", "{}", e);
                    report.forced = true;
                }
            }
        }

        report.abandoned = self.registry.drain_all();
        for request in &report.abandoned {
            let failure = Message::error_response(
                request.id.clone(),
                ResponseError::request_failed(format!(
                    "request '{}' abandoned: bridge stopped before the server replied",
                    request.method
                )),
            );
            let delivery = Delivery::Response {
                message: failure,
                request: request.clone(),
            };
            if let Err(e) = self.sink.publish(delivery).await {
                warn!(
                    target: "tsunagi::lifecycle",
                    "Could not report abandoned request {}: {}",
                    request.id,
                    e
                );
            }
        }
        if !report.abandoned.is_empty() {
            warn!(
                target: "tsunagi::lifecycle",
                "{} request(s) abandoned at shutdown",
                report.abandoned.len()
            );
        }

        self.state = LifecycleState::Stopped;
        info!(target: "tsunagi::lifecycle", "Bridge stopped");
        Ok(report)
    }
}
