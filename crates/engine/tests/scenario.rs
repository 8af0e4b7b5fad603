//! Scenario-level tests that run the orchestrator without child server
//! binaries: servers are declared and wired but never started, so test
//! queries exercise the skip-on-uninitialized path and snapshots the full
//! capture/load cycle.

use geosim_engine::Simulation;
use geosim_scenario::parse_scenario;
use geosim_supervisor::SimPaths;
use tempfile::TempDir;

#[tokio::test]
async fn uninitialized_targets_are_skipped_and_counted() {
    let tmp = TempDir::new().unwrap();
    let commands = parse_scenario(
        "\
ProfileServer A 2 31000 10.0 20.0 50000
Neighborhood A 1 2
TestQuery A 1 2 ** ** false NO_LOCATION NO_LOCATION 0
",
    )
    .unwrap();

    let mut sim = Simulation::new(SimPaths::new(tmp.path()), Some(7));
    let summary = sim.run(&commands).await.unwrap();
    assert_eq!(summary.commands_executed, 3);
    assert_eq!(summary.queries_skipped, 2);
    sim.shutdown().await;
}

#[tokio::test]
async fn snapshot_cycle_reproduces_world_state() {
    let tmp = TempDir::new().unwrap();
    let take = parse_scenario(
        "\
ProfileServer A 2 31100 10.0 20.0 50000
ProximityServer PX 1 31140 10.0 20.0 0
Neighborhood A 1 2
TakeSnapshot cycle
",
    )
    .unwrap();

    let mut sim = Simulation::new(SimPaths::new(tmp.path()), Some(11));
    sim.run(&take).await.unwrap();

    let original: Vec<(String, u16)> = {
        let mut servers: Vec<(String, u16)> = sim
            .world()
            .servers()
            .map(|record| {
                let inner = record.shared.lock();
                (inner.name.clone(), inner.base_port)
            })
            .collect();
        servers.sort();
        servers
    };
    sim.shutdown().await;

    // A fresh process loads the snapshot.
    let load = parse_scenario("LoadSnapshot cycle\n").unwrap();
    let mut restored = Simulation::new(SimPaths::new(tmp.path()), Some(12));
    restored.run(&load).await.unwrap();

    let mut loaded: Vec<(String, u16)> = restored
        .world()
        .servers()
        .map(|record| {
            let inner = record.shared.lock();
            (inner.name.clone(), inner.base_port)
        })
        .collect();
    loaded.sort();
    assert_eq!(loaded, original);

    // Locations survive as decimals.
    let a1 = restored.world().server("A001").unwrap();
    let location = a1.shared.lock().location;
    assert!(location.latitude > 9.0 && location.latitude < 11.0);
    assert!(!a1.is_running);

    restored.shutdown().await;
}

#[tokio::test]
async fn commands_fail_with_step_context() {
    let tmp = TempDir::new().unwrap();
    // StartServer on a group that was never declared.
    let commands = parse_scenario("StartServer A 1 1\n").unwrap();
    let mut sim = Simulation::new(SimPaths::new(tmp.path()), Some(1));
    let error = sim.run(&commands).await.unwrap_err();
    let message = error.to_string();
    assert!(message.contains("command 1"), "got: {message}");
    assert!(message.contains("StartServer"), "got: {message}");
    sim.shutdown().await;
}

async fn place(tmp: &TempDir) -> Vec<(String, String)> {
    let commands = parse_scenario("ProfileServer A 2 31200 10.0 20.0 50000\n").unwrap();
    let mut sim = Simulation::new(SimPaths::new(tmp.path()), Some(42));
    sim.run(&commands).await.unwrap();
    let mut locations: Vec<(String, String)> = sim
        .world()
        .servers()
        .map(|record| {
            let inner = record.shared.lock();
            (inner.name.clone(), format!("{}", inner.location))
        })
        .collect();
    locations.sort();
    sim.shutdown().await;
    locations
}

#[tokio::test]
async fn deterministic_seeds_give_identical_server_placement() {
    let tmp_a = TempDir::new().unwrap();
    let first = place(&tmp_a).await;
    let tmp_b = TempDir::new().unwrap();
    let second = place(&tmp_b).await;
    assert_eq!(first, second);
}
