//! Lifecycle behaviour of the supervisor against a temporary service directory.

#[path = "common/mod.rs"]
mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use common::{Fixture, foreign_pid, is_process_alive, kill_externally, wait_for_process_exit};
use unitctl::{
    error::ErrorKind,
    process::ProcessController,
    state::ServiceStatus,
    supervisor::{StartOutcome, StatusReport, StopOutcome, Supervisor},
};

fn active_pid(report: &StatusReport) -> Option<u32> {
    match report {
        StatusReport::Known(status) if status.status == ServiceStatus::Active => status.pid,
        _ => None,
    }
}

#[test]
fn start_then_status_reports_active_live_pid() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let started = supervisor.start("web").unwrap();
    let StartOutcome::Started { unit, pid } = &started else {
        panic!("expected a fresh start, got {started:?}");
    };
    assert_eq!(unit, "web.service");

    let report = supervisor.status("web").unwrap();
    assert_eq!(active_pid(&report), Some(*pid));
    assert!(is_process_alive(*pid));

    let record = supervisor.store().load().get("web.service").cloned().unwrap();
    assert_eq!(record.command, "sleep 30");
    assert!(record.is_active());
    assert!(!record.config_changed);

    supervisor.stop("web").unwrap();
}

#[test]
fn stop_of_never_started_service_reports_not_running() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let outcome = supervisor.stop("web").unwrap();
    assert_eq!(
        outcome,
        StopOutcome::NotRunning {
            unit: "web.service".into()
        }
    );
    assert_eq!(fixture.state_contents(), None);
}

#[test]
fn stop_terminates_and_marks_inactive() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let pid = supervisor.start("web").unwrap().pid();
    let begun = Instant::now();
    supervisor.stop("web").unwrap();
    assert!(begun.elapsed() < Duration::from_secs(2));
    wait_for_process_exit(pid);

    let record = supervisor.store().load().get("web.service").cloned().unwrap();
    assert_eq!(record.status, ServiceStatus::Inactive);
    assert_eq!(record.pid, pid);

    // Stopping again is harmless.
    assert!(matches!(
        supervisor.stop("web").unwrap(),
        StopOutcome::Stopped { .. }
    ));
}

#[test]
fn stop_escalates_when_sigterm_is_ignored() {
    let fixture = Fixture::new();
    fixture.write_unit(
        "stubborn",
        &["ExecStart=trap '' TERM; while true; do sleep 0.1; done"],
    );
    // Default five second grace period.
    let supervisor = Supervisor::new(fixture.config());

    let pid = supervisor.start("stubborn").unwrap().pid();
    thread::sleep(Duration::from_millis(300));
    assert!(is_process_alive(pid));

    let begun = Instant::now();
    supervisor.stop("stubborn").unwrap();
    let elapsed = begun.elapsed();

    assert!(elapsed >= Duration::from_secs(4), "stopped too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "stopped too late: {elapsed:?}");
    wait_for_process_exit(pid);

    let report = supervisor.status("stubborn").unwrap();
    assert_eq!(active_pid(&report), None);
}

#[test]
fn short_grace_period_with_fast_polling_escalates_quickly() {
    let fixture = Fixture::new();
    fixture.write_unit(
        "stubborn",
        &["ExecStart=trap '' TERM; while true; do sleep 0.1; done"],
    );
    let supervisor = Supervisor::with_controller(
        fixture
            .config()
            .with_grace_period(Duration::from_millis(500)),
        ProcessController::new(Duration::from_millis(50)),
    );
    assert_eq!(supervisor.config().grace_period, Duration::from_millis(500));

    let pid = supervisor.start("stubborn").unwrap().pid();
    thread::sleep(Duration::from_millis(300));

    let begun = Instant::now();
    supervisor.stop("stubborn").unwrap();
    let elapsed = begun.elapsed();
    assert!(elapsed >= Duration::from_millis(450), "stopped too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "stopped too late: {elapsed:?}");
    wait_for_process_exit(pid);
}

#[test]
fn stop_of_foreign_process_surfaces_signal_error() {
    let Some(pid) = foreign_pid() else {
        return;
    };
    let fixture = Fixture::new();
    fixture.write_unit("init", &["ExecStart=sleep 30"]);
    fixture.record_active("init.service", pid, "sleep 30");
    let before = fixture.state_contents().unwrap();
    let supervisor = fixture.supervisor();

    let err = supervisor.stop("init").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Signal);
    assert_eq!(err.exit_code(), 6);

    let record = supervisor.store().load().get("init.service").cloned().unwrap();
    assert!(record.is_active());
    assert_eq!(record.pid, pid);
    assert_eq!(fixture.state_contents().unwrap(), before);
}

#[test]
fn records_keyed_by_bare_name_are_found() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 100"]);
    std::fs::create_dir_all(fixture.state_file.parent().unwrap()).unwrap();
    // PID 1 is always alive, so the record stays active without spawning.
    std::fs::write(
        &fixture.state_file,
        "web:\n  cmd: sleep 100\n  pid: 1\n  start_time: 1718000000.0\n  status: active\n",
    )
    .unwrap();
    let supervisor = fixture.supervisor();

    assert_eq!(active_pid(&supervisor.status("web").unwrap()), Some(1));
    assert_eq!(
        supervisor.start("web").unwrap(),
        StartOutcome::AlreadyActive {
            unit: "web.service".into(),
            pid: 1
        }
    );

    let registry = supervisor.store().load();
    assert_eq!(registry.len(), 1);
    assert!(registry.contains("web.service"));
}

#[test]
fn externally_killed_service_is_reconciled_once() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 100"]);
    let supervisor = fixture.supervisor();

    let pid = supervisor.start("web").unwrap().pid();
    assert!(
        supervisor
            .store()
            .load()
            .get("web.service")
            .unwrap()
            .is_active()
    );

    kill_externally(pid);
    wait_for_process_exit(pid);

    let report = supervisor.status("web").unwrap();
    let StatusReport::Known(status) = &report else {
        panic!("expected a known service");
    };
    assert_eq!(status.status, ServiceStatus::Inactive);
    assert_eq!(status.pid, None);
    assert_eq!(status.command, "sleep 100");

    let persisted = fixture.state_contents().unwrap();
    assert_eq!(
        supervisor.store().load().get("web.service").unwrap().status,
        ServiceStatus::Inactive
    );

    let again = supervisor.status("web").unwrap();
    assert!(matches!(
        &again,
        StatusReport::Known(status) if status.status == ServiceStatus::Inactive
            && status.pid.is_none()
    ));
    assert_eq!(fixture.state_contents().unwrap(), persisted);
}

#[test]
fn list_units_reconciles_every_record() {
    let fixture = Fixture::new();
    fixture.write_unit("api", &["ExecStart=sleep 30"]);
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let api = supervisor.start("api").unwrap().pid();
    let web = supervisor.start("web").unwrap().pid();
    kill_externally(web);
    wait_for_process_exit(web);

    let listing = supervisor.list_units().unwrap();
    let names: Vec<_> = listing.units.iter().map(|row| row.unit.as_str()).collect();
    assert_eq!(names, ["api.service", "web.service"]);
    assert_eq!(listing.units[0].status, ServiceStatus::Active);
    assert_eq!(listing.units[0].pid, Some(api));
    assert_eq!(listing.units[1].status, ServiceStatus::Inactive);
    assert_eq!(listing.units[1].pid, None);

    let registry = supervisor.store().load();
    assert_eq!(
        registry.get("web.service").unwrap().status,
        ServiceStatus::Inactive
    );

    supervisor.stop("api").unwrap();
}

#[test]
fn start_of_active_service_does_not_spawn_twice() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let first = supervisor.start("web").unwrap().pid();
    let second = supervisor.start("web.service").unwrap();
    assert_eq!(
        second,
        StartOutcome::AlreadyActive {
            unit: "web.service".into(),
            pid: first
        }
    );

    supervisor.stop("web").unwrap();
}

#[test]
fn start_after_crash_spawns_a_new_process() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let first = supervisor.start("web").unwrap().pid();
    kill_externally(first);
    wait_for_process_exit(first);

    let second = supervisor.start("web").unwrap();
    assert!(matches!(second, StartOutcome::Started { pid, .. } if pid != first));

    supervisor.stop("web").unwrap();
}

#[test]
fn restart_replaces_the_process() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let first = supervisor.start("web").unwrap().pid();
    let restarted = supervisor.restart("web").unwrap();
    assert!(matches!(restarted.stop, StopOutcome::Stopped { .. }));
    let second = restarted.start.pid();
    assert_ne!(first, second);
    wait_for_process_exit(first);
    assert!(is_process_alive(second));

    supervisor.stop("web").unwrap();
}

#[test]
fn restart_of_unknown_service_still_starts_it() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    let supervisor = fixture.supervisor();

    let restarted = supervisor.restart("web").unwrap();
    assert!(matches!(restarted.stop, StopOutcome::NotRunning { .. }));
    assert!(matches!(restarted.start, StartOutcome::Started { .. }));

    supervisor.stop("web").unwrap();
}

#[test]
fn missing_exec_start_is_a_config_error() {
    let fixture = Fixture::new();
    fixture.write_unit("broken", &["WorkingDirectory=/tmp"]);
    let supervisor = fixture.supervisor();

    let err = supervisor.start("broken").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(fixture.state_contents(), None);
}

#[test]
fn missing_unit_file_is_a_config_error() {
    let fixture = Fixture::new();
    let supervisor = fixture.supervisor();

    let err = supervisor.start("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("ghost.service"));
}

#[test]
fn spawn_failure_leaves_registry_untouched() {
    let fixture = Fixture::new();
    fixture.write_unit("nowhere", &["ExecStart=true", "WorkingDirectory=/no/such/dir"]);
    let supervisor = fixture.supervisor();

    let err = supervisor.start("nowhere").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Spawn);
    assert!(supervisor.store().load().is_empty());
}

#[test]
fn status_of_unknown_service_is_not_found() {
    let fixture = Fixture::new();
    let supervisor = fixture.supervisor();

    assert_eq!(
        supervisor.status("ghost").unwrap(),
        StatusReport::NotFound {
            unit: "ghost.service".into()
        }
    );
}

#[test]
fn corrupt_state_file_is_treated_as_empty() {
    let fixture = Fixture::new();
    fixture.write_unit("web", &["ExecStart=sleep 30"]);
    std::fs::create_dir_all(fixture.state_file.parent().unwrap()).unwrap();
    std::fs::write(&fixture.state_file, ":: not yaml [").unwrap();
    let supervisor = fixture.supervisor();

    assert!(matches!(
        supervisor.status("web").unwrap(),
        StatusReport::NotFound { .. }
    ));
    let pid = supervisor.start("web").unwrap().pid();
    assert_eq!(supervisor.store().load().get("web.service").unwrap().pid, pid);

    supervisor.stop("web").unwrap();
}

#[test]
fn concurrent_starts_do_not_lose_updates() {
    let fixture = Fixture::new();
    let names: Vec<String> = (0..6).map(|idx| format!("svc{idx}")).collect();
    for name in &names {
        fixture.write_unit(name, &["ExecStart=sleep 30"]);
    }

    let config = fixture.config().with_grace_period(Duration::from_secs(2));
    let handles: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let supervisor = Supervisor::new(config.clone());
            thread::spawn(move || supervisor.start(&name).unwrap().pid())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let supervisor = fixture.supervisor();
    let registry = supervisor.store().load();
    assert_eq!(registry.len(), names.len());

    for name in &names {
        supervisor.stop(name).unwrap();
    }
}
