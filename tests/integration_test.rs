//! Integration tests for muxsim against the mock mux simulator
//!
//! These tests spawn actual mock-mux-simulator processes and drive them
//! through the public client API.

use muxsim::{
    ActiveSide, DirectionSet, MuxError, MuxSimulatorClient, Side, StaticTopology,
    with_drop_recovery,
};
use serial_test::serial;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

const VMSET: &str = "vms1-2";

/// A running mock-mux-simulator.
///
/// Waits for the server to signal readiness before returning.
/// Automatically kills the server when dropped.
struct MockSimulator {
    child: Child,
    port: u16,
}

impl MockSimulator {
    /// Spawn a simulator with `ports` mux ports on a dynamically allocated port.
    async fn spawn(ports: u16) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_mock-mux-simulator"))
            .args(["--port", "0", "--vmset", VMSET, "--ports"])
            .arg(ports.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn mock-mux-simulator");

        let stdout = child.stdout.take().expect("Failed to capture stdout");
        let mut reader = BufReader::new(stdout).lines();

        let port = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(line) = reader.next_line().await.expect("Failed to read stdout") {
                if let Some(port_str) = line.strip_prefix("READY ") {
                    return port_str.parse::<u16>().expect("Failed to parse port");
                }
            }
            panic!("Simulator never signaled READY");
        })
        .await
        .expect("Timeout waiting for simulator to be ready");

        Self { child, port }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/mux/{}", self.port, VMSET)
    }

    /// Client with Ethernet0 → 3, Ethernet4 → 1, Ethernet8 → 2.
    fn client(&self) -> MuxSimulatorClient {
        let topology: StaticTopology = [("Ethernet0", 3), ("Ethernet4", 1), ("Ethernet8", 2)]
            .into_iter()
            .collect();
        MuxSimulatorClient::new(self.base_url(), Arc::new(topology))
    }

    async fn stats(&self) -> serde_json::Value {
        reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/stats", self.port))
            .send()
            .await
            .expect("Request failed")
            .json()
            .await
            .expect("Failed to parse response")
    }

    async fn fail_requests(&self, enabled: bool) {
        let status = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/control/fail-requests", self.port))
            .json(&serde_json::json!({ "enabled": enabled }))
            .send()
            .await
            .expect("Request failed")
            .status();
        assert!(status.is_success());
    }
}

impl Drop for MockSimulator {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

#[tokio::test]
#[serial]
async fn test_toggle_port_and_read_back() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    client.toggle_to_lower("Ethernet0").await.unwrap();
    assert_eq!(
        client.read_active_side("Ethernet0").await.unwrap(),
        ActiveSide::Lower
    );

    client.toggle_to("Ethernet0", Side::UpperTor).await.unwrap();
    assert_eq!(
        client.read_active_side("Ethernet0").await.unwrap(),
        ActiveSide::Upper
    );

    // Other ports are untouched.
    assert_eq!(
        client.read_active_side("Ethernet4").await.unwrap(),
        ActiveSide::Upper
    );
    assert_eq!(client.flap_counter("Ethernet0").await.unwrap(), 2);
    assert_eq!(client.flap_counter("Ethernet4").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_toggle_all_flips_every_port() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    client.toggle_to_lower("Ethernet4").await.unwrap();
    client.toggle_all(Side::Toggle).await.unwrap();

    let statuses = client.all_port_status().await.expect("bulk status");
    assert_eq!(statuses.len(), 4);
    assert_eq!(statuses[&1].active(), ActiveSide::Upper);
    for port in [0, 2, 3] {
        assert_eq!(statuses[&port].active(), ActiveSide::Lower, "port {port}");
    }

    client.toggle_all(Side::UpperTor).await.unwrap();
    let counters = client.flap_counters().await.unwrap();
    assert_eq!(counters, BTreeMap::from([(0, 2), (1, 2), (2, 2), (3, 2)]));

    client.toggle_all(Side::Random).await.unwrap();
    assert_ne!(
        client.read_active_side("Ethernet8").await.unwrap(),
        ActiveSide::Indeterminate
    );
}

#[tokio::test]
#[serial]
async fn test_toggle_all_rejects_nic_without_request() {
    let sim = MockSimulator::spawn(2).await;
    let client = sim.client();

    let err = client.toggle_all(Side::Nic).await.unwrap_err();
    assert!(matches!(err, MuxError::UnsupportedSide { .. }));
    assert_eq!(sim.stats().await["request_count"], 0);
}

#[tokio::test]
#[serial]
async fn test_clear_flap_counters() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    client.toggle_all(Side::LowerTor).await.unwrap();
    client.toggle_to_upper("Ethernet0").await.unwrap();
    assert_eq!(client.flap_counter("Ethernet0").await.unwrap(), 2);

    client.clear_flap_counter(Some("Ethernet0")).await.unwrap();
    let counters = client.flap_counters().await.unwrap();
    assert_eq!(counters[&3], 0);
    assert_eq!(counters[&1], 1);

    client.clear_flap_counter(None).await.unwrap();
    let counters = client.flap_counters().await.unwrap();
    assert!(counters.values().all(|count| *count == 0), "{counters:?}");
}

#[tokio::test]
#[serial]
async fn test_drop_then_recover_restores_all_directions() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    client
        .set_drop("Ethernet0", &DirectionSet::tors())
        .await
        .unwrap();
    let status = client.port_status("Ethernet0").await.unwrap().unwrap();
    assert_eq!(
        status.out_sides,
        Some(DirectionSet::new([Side::Nic]).unwrap())
    );

    client.recover_all_directions("Ethernet0").await.unwrap();
    client.recover_all_directions("Ethernet0").await.unwrap();
    let status = client.port_status("Ethernet0").await.unwrap().unwrap();
    assert_eq!(status.out_sides, Some(DirectionSet::all()));

    client
        .set_output("Ethernet8", &DirectionSet::new([Side::Nic]).unwrap())
        .await
        .unwrap();
    let status = client.port_status("Ethernet8").await.unwrap().unwrap();
    assert_eq!(status.out_sides, Some(DirectionSet::all()));
}

#[tokio::test]
#[serial]
async fn test_scoped_recovery_undoes_drops_on_error() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    let result: Result<(), MuxError> = with_drop_recovery(&client, |registry| async move {
        registry.simulate_server_down("Ethernet0").await?;
        registry
            .set_drop("Ethernet4", &DirectionSet::new([Side::Nic]).unwrap())
            .await?;
        assert_eq!(registry.pending(), vec!["Ethernet0", "Ethernet4"]);

        // Fails after the drops are in place.
        registry.client().toggle_to_upper("Ethernet99").await
    })
    .await;

    assert!(matches!(result, Err(MuxError::Topology(_))));
    for interface in ["Ethernet0", "Ethernet4"] {
        let status = client.port_status(interface).await.unwrap().unwrap();
        assert_eq!(status.out_sides, Some(DirectionSet::all()), "{interface}");
    }
}

#[tokio::test]
#[serial]
async fn test_scoped_recovery_undoes_drops_on_panic() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    let task_client = client.clone();
    let outcome = tokio::spawn(async move {
        with_drop_recovery(&task_client, |registry| async move {
            registry.simulate_server_down("Ethernet8").await?;
            let status = registry.client().port_status("Ethernet8").await?;
            assert_eq!(status.unwrap().active(), ActiveSide::Lower, "deliberate");
            Ok::<_, MuxError>(())
        })
        .await
    })
    .await;

    assert!(outcome.unwrap_err().is_panic());
    let status = client.port_status("Ethernet8").await.unwrap().unwrap();
    assert_eq!(status.out_sides, Some(DirectionSet::all()));
}

#[tokio::test]
#[serial]
async fn test_reset_restores_port() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    client.toggle_to_lower("Ethernet0").await.unwrap();
    client
        .set_drop("Ethernet0", &DirectionSet::all())
        .await
        .unwrap();

    client.reset_port(Some("Ethernet0")).await.unwrap();
    let status = client.port_status("Ethernet0").await.unwrap().unwrap();
    assert_eq!(status.active(), ActiveSide::Upper);
    assert_eq!(status.out_sides, Some(DirectionSet::all()));

    client.toggle_all(Side::LowerTor).await.unwrap();
    client.reset_port(None).await.unwrap();
    let statuses = client.all_port_status().await.unwrap();
    assert!(
        statuses
            .values()
            .all(|status| status.active() == ActiveSide::Upper)
    );
}

#[tokio::test]
#[serial]
async fn test_simulator_failures_surface_as_rejections() {
    let sim = MockSimulator::spawn(4).await;
    let client = sim.client();

    sim.fail_requests(true).await;

    assert!(matches!(
        client.toggle_to_upper("Ethernet0").await,
        Err(MuxError::Rejected { .. })
    ));
    assert_eq!(
        client.read_active_side("Ethernet0").await.unwrap(),
        ActiveSide::Indeterminate
    );
    assert!(matches!(
        client.flap_counter("Ethernet0").await,
        Err(MuxError::FlapCounterEntries { entries: 0, .. })
    ));
    assert!(client.all_port_status().await.is_none());

    sim.fail_requests(false).await;
    client.toggle_to_upper("Ethernet0").await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_unknown_port_index_is_rejected() {
    let sim = MockSimulator::spawn(2).await;
    let client = sim.client();

    // Ethernet0 maps to port 3, which this simulator does not have.
    assert!(matches!(
        client.toggle_to_upper("Ethernet0").await,
        Err(MuxError::Rejected { .. })
    ));
    assert_eq!(
        client.read_active_side("Ethernet0").await.unwrap(),
        ActiveSide::Indeterminate
    );
}

#[tokio::test]
#[serial]
async fn test_cli_reads_status_from_config() {
    let sim = MockSimulator::spawn(4).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("muxsim.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "testbed": {
                "topo": "dualtor",
                "group_name": VMSET,
                "duts": ["upper-tor", "lower-tor"]
            },
            "simulator": { "host": "127.0.0.1", "port": sim.port },
            "topology": { "static": { "ptf_indices": { "Ethernet0": 3 } } }
        })
        .to_string(),
    )
    .unwrap();

    let run = |args: &[&str]| {
        let config_path = config_path.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        async move {
            Command::new(env!("CARGO_BIN_EXE_muxsim"))
                .arg("--config")
                .arg(&config_path)
                .args(&args)
                .output()
                .await
                .expect("Failed to run muxsim")
        }
    };

    let output = run(&["toggle-all", "--dut", "lower-tor"]).await;
    assert!(output.status.success());

    let output = run(&["status", "--interface", "Ethernet0"]).await;
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["active_side"], "lower_tor");

    let output = run(&["toggle-all", "--side", "nic"]).await;
    assert!(!output.status.success());

    let output = run(&["flap-counter", "--interface", "Ethernet0"]).await;
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1");
}
