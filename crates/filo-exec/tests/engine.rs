use filo_exec::engine::{Engine, ExecState, ExecTiming};
use filo_fc::link::FcLink;
use filo_fc::state::FlightStateHandle;
use filo_program::{parse, Program, SafetyPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// ─── Helpers ────────────────────────────────────────────────────────

struct Rig {
    state: FlightStateHandle,
    engine: Arc<Engine>,
    wire: mpsc::UnboundedReceiver<String>,
}

/// Engine wired to an in-memory FC that records every line written to it.
fn rig(policy: SafetyPolicy) -> Rig {
    let (tx, rx) = tokio::io::duplex(64 * 1024);
    let state = FlightStateHandle::new();
    state.update(|st| st.telemetry.battery_percent = 90);

    let (wire_tx, wire) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(rx).lines();
        while let Ok(Some(l)) = lines.next_line().await {
            let _ = wire_tx.send(l);
        }
    });

    let link = Arc::new(FcLink::new(tx, state.clone()));
    let engine = Arc::new(Engine::new(link, policy, ExecTiming::default()));
    Rig { state, engine, wire }
}

fn program(src: &str) -> Program {
    parse(src, &SafetyPolicy::default()).collect()
}

async fn drain(wire: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    // let the recorder catch up
    tokio::time::sleep(Duration::from_millis(1)).await;
    let mut out = Vec::new();
    while let Ok(l) = wire.try_recv() {
        out.push(l);
    }
    out
}

const FORWARD: &str = "CMD,0.00,15.00,1400,0.00";

// ─── Normal execution ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn full_program_completes_and_releases_control() {
    let mut rig = rig(SafetyPolicy::default());
    let handle = rig.engine.start(program("takeoff()\nmove_forward(100)\nland()")).expect("start");
    assert!(rig.state.is_autonomous());

    let out = handle.wait().await;
    assert_eq!(out.state, ExecState::Completed);
    assert_eq!(out.executed, 3);
    assert!(out.reason.is_none());
    assert!(!rig.state.is_autonomous());
    assert!(!rig.state.is_armed());

    let lines = drain(&mut rig.wire).await;
    assert_eq!(lines.first().map(String::as_str), Some("ARM"));
    assert_eq!(lines.get(1).map(String::as_str), Some("CMD,0.00,0.00,1100,0.00"));
    // 2.0s at 20 Hz
    assert_eq!(lines.iter().filter(|l| *l == FORWARD).count(), 40);
    let last_fwd = lines.iter().rposition(|l| l == FORWARD).unwrap();
    assert_eq!(lines[last_fwd + 1], "CMD,0.00,0.00,1400,0.00");
    assert_eq!(lines.last().map(String::as_str), Some("DISARM"));
}

#[tokio::test(start_paused = true)]
async fn already_armed_takeoff_skips_arm_request() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let out = rig.engine.start(program("takeoff()\nland()")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Completed);
    let lines = drain(&mut rig.wire).await;
    assert!(!lines.iter().any(|l| l == "ARM"));
}

#[tokio::test(start_paused = true)]
async fn wait_and_led_write_nothing() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let out = rig.engine.start(program("wait(2)\nled_flash(255,0,0,5)")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Completed);
    assert!(drain(&mut rig.wire).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_start_is_refused_while_running() {
    let rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let handle = rig.engine.start(program("wait(5)")).unwrap();
    assert!(rig.engine.start(program("wait(1)")).is_none());
    handle.wait().await;
    assert!(rig.engine.start(program("wait(1)")).is_some());
}

// ─── Aborts ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_mid_move_lands_within_one_tick() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let mut status = rig.engine.subscribe();
    let handle = rig.engine.start(program("takeoff()\nmove_forward(200)\nland()")).unwrap();

    // takeoff ramp + hold is 3.7s; the 4s move runs until 7.7s
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.engine.state(), ExecState::Running);
    handle.stop();

    let tick = ExecTiming::default().tick;
    tokio::time::timeout(tick, status.wait_for(|s| *s == ExecState::EmergencyLanding))
        .await
        .expect("emergency landing within one tick")
        .unwrap();

    let out = handle.wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert_eq!(out.executed, 1);
    assert_eq!(out.reason.as_deref(), Some("stop requested"));
    assert!(!rig.state.is_autonomous());

    let lines = drain(&mut rig.wire).await;
    let last_fwd = lines.iter().rposition(|l| l == FORWARD).unwrap();
    assert_eq!(
        &lines[last_fwd + 1..],
        &[
            "CMD,0.00,0.00,1300,0.00",
            "CMD,0.00,0.00,1200,0.00",
            "CMD,0.00,0.00,1100,0.00",
            "CMD,0.00,0.00,1000,0.00",
            "DISARM",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn low_battery_forces_emergency_landing() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let handle = rig.engine.start(program("takeoff()\nmove_forward(200)\nland()")).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    rig.state.update(|st| st.telemetry.battery_percent = 15);

    let out = handle.wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert!(out.reason.unwrap().contains("battery 15%"));
    assert_eq!(drain(&mut rig.wire).await.last().map(String::as_str), Some("DISARM"));
}

#[tokio::test(start_paused = true)]
async fn excessive_tilt_abandons_move() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let handle = rig.engine.start(program("takeoff()\nmove_forward(200)\nmove_back(200)\nland()")).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    rig.state.update(|st| st.telemetry.pitch = -50.0);

    let out = handle.wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert!(out.reason.unwrap().contains("attitude"));
    let lines = drain(&mut rig.wire).await;
    assert!(!lines.iter().any(|l| l == "CMD,0.00,-15.00,1400,0.00"), "second move must not run");
}

#[tokio::test(start_paused = true)]
async fn flight_time_limit_checked_between_commands() {
    let policy = SafetyPolicy { max_flight_time: 5.0, ..Default::default() };
    let rig = rig(policy);
    rig.state.set_armed(true);
    let out = rig.engine.start(program("takeoff()\nwait(3)\nstop()\nland()")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert_eq!(out.executed, 2);
    assert!(out.reason.unwrap().contains("flight time"));
}

#[tokio::test(start_paused = true)]
async fn flight_time_limit_cuts_a_move_short() {
    let policy = SafetyPolicy { max_flight_time: 5.0, ..Default::default() };
    let mut rig = rig(policy);
    rig.state.set_armed(true);
    // the 4s move starts at 3.7s, so the limit lands about 1.3s into it
    let out = rig.engine.start(program("takeoff()\nmove_forward(200)\nland()")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert_eq!(out.executed, 1);
    assert!(out.reason.unwrap().contains("flight time"));

    let lines = drain(&mut rig.wire).await;
    let ticks = lines.iter().filter(|l| *l == FORWARD).count();
    assert!((20..=30).contains(&ticks), "{} move ticks sent", ticks);
    let last_fwd = lines.iter().rposition(|l| l == FORWARD).unwrap();
    assert_eq!(lines[last_fwd + 1], "CMD,0.00,0.00,1300,0.00");
    assert_eq!(lines.last().map(String::as_str), Some("DISARM"));
}

#[tokio::test(start_paused = true)]
async fn emergency_command_disarms_and_aborts() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let out = rig.engine.start(program("takeoff()\nemergency()\nland()")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert_eq!(out.executed, 2);
    assert!(out.reason.is_none());
    assert!(!rig.state.is_armed());

    let lines = drain(&mut rig.wire).await;
    // takeoff hold frame, then straight to DISARM with no landing ramp
    assert!(lines.ends_with(&["CMD,0.00,0.00,1400,0.00".to_string(), "DISARM".to_string()]));
}

#[tokio::test(start_paused = true)]
async fn revoked_control_abandons_without_landing() {
    let mut rig = rig(SafetyPolicy::default());
    rig.state.set_armed(true);
    let handle = rig.engine.start(program("takeoff()\nmove_forward(200)\nland()")).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    // what an FC alert line or an operator disarm does
    rig.state.force_disarm();

    let out = handle.wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert_eq!(out.reason.as_deref(), Some("control revoked"));
    let lines = drain(&mut rig.wire).await;
    assert_eq!(lines.last().map(String::as_str), Some(FORWARD));
}

#[tokio::test(start_paused = true)]
async fn dead_link_still_terminates() {
    let (tx, rx) = tokio::io::duplex(64);
    drop(rx);
    let state = FlightStateHandle::new();
    state.update(|st| st.telemetry.battery_percent = 90);
    state.set_armed(true);
    let link = Arc::new(FcLink::new(tx, state.clone()));
    let engine = Arc::new(Engine::new(link, SafetyPolicy::default(), ExecTiming::default()));

    let out = engine.start(program("takeoff()\nland()")).unwrap().wait().await;
    assert_eq!(out.state, ExecState::Aborted);
    assert!(out.reason.unwrap().starts_with("fc link failure"));
    assert!(!state.is_autonomous());
    assert!(!state.is_armed());
}
