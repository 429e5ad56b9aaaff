//! Fleet supervision with real child processes.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;

use fleet_gateway::config::{GatewayConfig, LaunchConfig, ServiceConfig};
use fleet_gateway::lifecycle::Interrupt;
use fleet_gateway::supervisor::{ChildState, StopReason, Supervisor, SupervisorError};

mod common;

fn launched(key: &str, port: u16, program: &str, args: &[&str]) -> ServiceConfig {
    let mut service = common::service(key, &format!("/api/{}", key), port, common::strip("/"));
    service.launch = Some(LaunchConfig {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: None,
        env: BTreeMap::new(),
        port_var: Some("PORT".to_string()),
    });
    service
}

fn fleet_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = common::test_config(services);
    config.supervisor.stagger_ms = 50;
    config.supervisor.settle_ms = 10;
    config.supervisor.poll_interval_ms = 50;
    config.supervisor.grace_period_secs = 2;
    config.supervisor.reclaim_settle_ms = 10;
    config.supervisor.launch_gateway = false;
    config
}

fn sleeper(key: &str) -> ServiceConfig {
    launched(key, common::closed_port(), "sleep", &["30"])
}

#[tokio::test]
async fn interrupt_stops_every_child() {
    let config = fleet_config(vec![sleeper("main"), sleeper("ai_chatbot"), sleeper("ai_image")]);
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = tx.send(Interrupt::Interrupt);
        // A second interrupt during shutdown must not disturb it.
        let _ = tx.send(Interrupt::Terminate);
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let report = Supervisor::new(config, None).run(rx).await.unwrap();

    assert_eq!(report.reason, StopReason::Interrupted);
    assert_eq!(report.exit_code(), 0);
    let keys: Vec<_> = report.children.iter().map(|c| c.service_key.as_str()).collect();
    assert_eq!(keys, ["main", "ai_chatbot", "ai_image"]);
    for child in &report.children {
        assert_eq!(child.state, ChildState::Terminated, "{}", child.service_key);
        assert!(child.pid.is_some());
        assert!(child.last_seen_alive >= child.started_at);
    }
}

#[tokio::test]
async fn child_exit_takes_the_fleet_down() {
    let config = fleet_config(vec![
        sleeper("main"),
        launched("ai_chatbot", common::closed_port(), "sh", &["-c", "sleep 0.3; exit 4"]),
    ]);
    let (_tx, rx) = mpsc::unbounded_channel();

    let report = tokio::time::timeout(Duration::from_secs(10), Supervisor::new(config, None).run(rx))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        report.reason,
        StopReason::ChildExited {
            key: "ai_chatbot".into(),
            code: Some(4)
        }
    );
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.children[0].state, ChildState::Terminated);
    assert_eq!(report.children[1].state, ChildState::Exited { code: Some(4) });
}

#[tokio::test]
async fn spawn_failure_stops_already_running_children() {
    let config = fleet_config(vec![
        sleeper("main"),
        launched("ai_image", common::closed_port(), "/nonexistent/fleet-service", &[]),
        sleeper("ai_assessment"),
    ]);
    let (_tx, rx) = mpsc::unbounded_channel();

    let report = tokio::time::timeout(Duration::from_secs(10), Supervisor::new(config, None).run(rx))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.reason, StopReason::SpawnFailed { key: "ai_image".into() });
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.children.len(), 1);
    assert_eq!(report.children[0].service_key, "main");
    assert_eq!(report.children[0].state, ChildState::Terminated);
}

#[tokio::test]
async fn unreclaimable_port_aborts_before_launch() {
    // Held by this test process, which the reconciler never targets.
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();

    let config = fleet_config(vec![launched("main", port, "sleep", &["30"])]);
    let (_tx, rx) = mpsc::unbounded_channel();

    let err = Supervisor::new(config, None).run(rx).await.unwrap_err();
    match err {
        SupervisorError::PortsUnavailable(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].port(), port);
        }
        other => panic!("unexpected error: {other}"),
    }
}
