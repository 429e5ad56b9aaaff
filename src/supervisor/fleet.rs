//! Fleet supervisor: owns every child process, the gateway included.
//!
//! # Responsibilities
//! - Reclaim all managed ports before anything is launched
//! - Launch upstreams in declared order with a stagger, the gateway last
//! - Turn the first unexpected child exit into a fleet-wide shutdown
//! - Stop children in reverse launch order, then reclaim ports again
//!
//! # Design Decisions
//! - Readiness is assumed after the stagger, not probed
//! - A spawn failure is treated like a child that died
//! - Shutdown runs once; repeated interrupts are logged and ignored

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::{GatewayConfig, LaunchConfig};
use crate::lifecycle::{Interrupt, Shutdown};
use crate::supervisor::child::{spawn_child, ChildHandle, ChildProcessRecord, FleetEvent, ProcessSpec};
use crate::supervisor::ports::{PortReconciler, Reclaim, ReclaimError};

/// Key used for the gateway's own child record.
pub const GATEWAY_KEY: &str = "gateway";

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("could not free required ports: {}", describe_reclaim_failures(.0))]
    PortsUnavailable(Vec<ReclaimError>),

    #[error("cannot locate the fleet-gateway binary: {0}")]
    GatewayBinary(#[source] io::Error),

    #[error("gateway bind address '{0}' has no port")]
    GatewayPort(String),
}

fn describe_reclaim_failures(errors: &[ReclaimError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why the fleet stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    ChildExited { key: String, code: Option<i32> },
    SpawnFailed { key: String },
}

#[derive(Debug)]
pub struct SupervisorReport {
    pub reason: StopReason,
    /// Final records in launch order.
    pub children: Vec<ChildProcessRecord>,
}

impl SupervisorReport {
    /// 0 after an operator interrupt, 1 when a child died or failed to start.
    pub fn exit_code(&self) -> u8 {
        match self.reason {
            StopReason::Interrupted => 0,
            StopReason::ChildExited { .. } | StopReason::SpawnFailed { .. } => 1,
        }
    }
}

pub struct Supervisor {
    config: GatewayConfig,
    config_path: Option<PathBuf>,
    reconciler: PortReconciler,
}

impl Supervisor {
    pub fn new(config: GatewayConfig, config_path: Option<PathBuf>) -> Self {
        let reconciler = PortReconciler::system(
            Duration::from_millis(config.supervisor.reclaim_settle_ms),
            Duration::from_secs(config.supervisor.grace_period_secs),
        );
        Self {
            config,
            config_path,
            reconciler,
        }
    }

    /// Swap the port reconciler (tests inject fakes here).
    pub fn with_reconciler(mut self, reconciler: PortReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Children in launch order: launchable upstreams, then the gateway.
    pub fn launch_plan(&self) -> Result<Vec<ProcessSpec>, SupervisorError> {
        let mut plan: Vec<ProcessSpec> = self
            .config
            .services
            .iter()
            .filter_map(|service| {
                service.launch.as_ref().map(|launch| {
                    build_spec(
                        &service.key,
                        &service.name,
                        launch,
                        service.port,
                        launch.port_var.as_deref(),
                    )
                })
            })
            .collect();

        if self.config.supervisor.launch_gateway {
            plan.push(self.gateway_spec()?);
        }
        Ok(plan)
    }

    fn gateway_spec(&self) -> Result<ProcessSpec, SupervisorError> {
        let port = self
            .config
            .gateway_port()
            .ok_or_else(|| SupervisorError::GatewayPort(self.config.listener.bind_address.clone()))?;

        let mut launch = self.config.supervisor.gateway.clone();
        if launch.program.is_empty() {
            launch.program = sibling_gateway_binary()
                .map_err(SupervisorError::GatewayBinary)?
                .to_string_lossy()
                .into_owned();
        }
        if let Some(path) = &self.config_path {
            let path = path.to_string_lossy().into_owned();
            launch.args.extend(["--config".to_string(), path.clone()]);
            launch.env.insert("FLEET_GATEWAY_CONFIG".to_string(), path);
        }

        let port_var = launch
            .port_var
            .clone()
            .or_else(|| self.config.listener.port_env.clone())
            .unwrap_or_else(|| "GATEWAY_PORT".to_string());

        Ok(build_spec(
            GATEWAY_KEY,
            "API Gateway",
            &launch,
            port,
            Some(&port_var),
        ))
    }

    /// Ports of everything the supervisor launches.
    fn managed_ports(plan: &[ProcessSpec]) -> Vec<u16> {
        let mut ports = Vec::new();
        for port in plan.iter().filter_map(|spec| spec.port) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// Reclaim, launch, supervise, shut down. Returns once every child is gone.
    pub async fn run(
        &self,
        mut interrupts: mpsc::UnboundedReceiver<Interrupt>,
    ) -> Result<SupervisorReport, SupervisorError> {
        let settings = &self.config.supervisor;
        let plan = self.launch_plan()?;
        let ports = Self::managed_ports(&plan);

        // 1. Clear stale listeners; a port we cannot free is fatal.
        tracing::info!(ports = ?ports, "Cleaning up ports");
        let mut failures = Vec::new();
        for &port in &ports {
            match self.reconciler.reclaim(port).await {
                Ok(Reclaim::AlreadyFree) => tracing::debug!(port, "Port free"),
                Ok(Reclaim::Freed { pids }) => tracing::info!(port, pids = ?pids, "Port reclaimed"),
                Err(e) => {
                    tracing::error!(port, error = %e, "Port reclaim failed");
                    failures.push(e);
                }
            }
        }
        if !failures.is_empty() {
            return Err(SupervisorError::PortsUnavailable(failures));
        }
        sleep(Duration::from_millis(settings.settle_ms)).await;

        // 2. Launch in order with a stagger window after each upstream.
        let poll = Duration::from_millis(settings.poll_interval_ms);
        let stagger = Duration::from_millis(settings.stagger_ms);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut running: Vec<ChildHandle> = Vec::with_capacity(plan.len());
        let mut stop_reason = None;

        for (index, spec) in plan.iter().enumerate() {
            match spawn_child(spec, poll, events_tx.clone()) {
                Ok(handle) => {
                    tracing::info!(
                        service = %spec.key,
                        name = %spec.name,
                        pid = ?handle.pid,
                        port = ?spec.port,
                        "Launched"
                    );
                    running.push(handle);
                }
                Err(e) => {
                    tracing::error!(service = %spec.key, program = %spec.program, error = %e, "Failed to start");
                    stop_reason = Some(StopReason::SpawnFailed {
                        key: spec.key.clone(),
                    });
                    break;
                }
            }

            if index + 1 == plan.len() {
                break;
            }
            tokio::select! {
                _ = sleep(stagger) => {}
                Some(signal) = interrupts.recv() => {
                    tracing::warn!(signal = ?signal, "Interrupted during startup");
                    stop_reason = Some(StopReason::Interrupted);
                    break;
                }
                Some(FleetEvent::Exited { key, code }) = events_rx.recv() => {
                    stop_reason = Some(StopReason::ChildExited { key, code });
                    break;
                }
            }
        }

        // 3. Supervise until interrupted or a child dies.
        let reason = match stop_reason {
            Some(reason) => reason,
            None => {
                tracing::info!(children = running.len(), "All services started");
                tokio::select! {
                    Some(signal) = interrupts.recv() => {
                        tracing::info!(signal = ?signal, "Interrupt received");
                        StopReason::Interrupted
                    }
                    Some(FleetEvent::Exited { key, code }) = events_rx.recv() => {
                        StopReason::ChildExited { key, code }
                    }
                    else => StopReason::Interrupted,
                }
            }
        };

        // 4. Coordinated shutdown.
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tracing::warn!(reason = ?reason, "Shutting down all services");

        let repeat_guard = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while let Some(signal) = interrupts.recv().await {
                    if !shutdown.trigger() {
                        tracing::info!(signal = ?signal, "Shutdown already in progress");
                    }
                }
            })
        };

        let grace = Duration::from_secs(settings.grace_period_secs);
        let mut children = Vec::with_capacity(running.len());
        for handle in running.into_iter().rev() {
            let record = handle.stop(grace).await;
            tracing::info!(service = %record.service_key, state = ?record.state, "Stopped");
            children.push(record);
        }
        children.reverse();
        repeat_guard.abort();

        // 5. Leave no stale listener behind for the next start.
        for &port in &ports {
            if let Err(e) = self.reconciler.reclaim(port).await {
                tracing::warn!(port, error = %e, "Port still busy after shutdown");
            }
        }

        shutdown.complete();
        tracing::info!("All services stopped");
        Ok(SupervisorReport { reason, children })
    }
}

fn build_spec(
    key: &str,
    name: &str,
    launch: &LaunchConfig,
    port: u16,
    port_var: Option<&str>,
) -> ProcessSpec {
    let mut env = launch.env.clone();
    if let Some(var) = port_var {
        env.insert(var.to_string(), port.to_string());
    }
    ProcessSpec {
        key: key.to_string(),
        name: name.to_string(),
        program: launch.program.clone(),
        args: launch.args.clone(),
        cwd: launch.cwd.clone(),
        env,
        port: Some(port),
    }
}

/// `fleet-gateway` next to the running executable.
fn sibling_gateway_binary() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("fleet-gateway{}", std::env::consts::EXE_SUFFIX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_launches_gateway_last() {
        let mut config = GatewayConfig::default();
        config.supervisor.gateway.program = "/opt/fleet/fleet-gateway".into();
        let supervisor = Supervisor::new(config, Some(PathBuf::from("/etc/fleet.toml")));

        let plan = supervisor.launch_plan().unwrap();
        let keys: Vec<_> = plan.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["main", "ai_chatbot", "ai_assessment", "ai_image", "gateway"]);

        assert_eq!(plan[1].env["PORT"], "5001");
        let gateway = &plan[4];
        assert_eq!(gateway.env["GATEWAY_PORT"], "8080");
        assert_eq!(gateway.env["FLEET_GATEWAY_CONFIG"], "/etc/fleet.toml");
        assert_eq!(gateway.args, ["--config", "/etc/fleet.toml"]);
        assert_eq!(Supervisor::managed_ports(&plan), [5000, 5001, 5002, 5003, 8080]);
    }

    #[test]
    fn externally_run_services_are_not_launched() {
        let mut config = GatewayConfig::default();
        config.services[0].launch = None;
        config.supervisor.launch_gateway = false;
        let plan = Supervisor::new(config, None).launch_plan().unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|s| s.port != Some(5000)));
    }

    #[test]
    fn exit_codes() {
        let report = |reason| SupervisorReport {
            reason,
            children: Vec::new(),
        };
        assert_eq!(report(StopReason::Interrupted).exit_code(), 0);
        assert_eq!(
            report(StopReason::ChildExited { key: "main".into(), code: Some(1) }).exit_code(),
            1
        );
        assert_eq!(report(StopReason::SpawnFailed { key: "main".into() }).exit_code(), 1);
    }
}
