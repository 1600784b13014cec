//! End-to-end tests: Apps, the App registry, a Device and the logger talking
//! over real Unix datagram sockets in a temporary directory.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prime_api::{
    ApiError, AppInterface, Binding, DeviceInterface, Endpoint, InterfaceConfig, LogEntry,
    LoggerSink, PeerMode, Transport,
};
use prime_core::{
    AppKnobType, AppMonitorType, DeviceKnobType, DeviceMonitorType, Disc, MonitorReading,
    PackedId, ScalarKind, Value,
};
use prime_protocol::{FastFrame, Frame, SlowFrame, SlowMessage};
use prime_rtm::{spawn_app_registry, AppEvent, AppRegistryHandle, DeregisterReason, RtmDeviceInterface};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything that should happen "soon"
const SETTLE: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

const ARCH: &str = r#"{
    "device": {
        "descriptor": "bench-board",
        "functional_units": {
            "cpu": {
                "id": 1,
                "knobs": { "id": 0, "freq": { "id": 0, "type": 1 } },
                "mons": { "id": 1, "power": { "id": 0, "type": 0 } }
            }
        }
    }
}"#;

// ============================================================================
// Test Helpers
// ============================================================================

fn config(dir: &TempDir) -> InterfaceConfig {
    InterfaceConfig {
        logger_enabled: false,
        request_timeout_ms: 2000,
        ..InterfaceConfig::with_socket_dir(dir.path())
    }
}

/// Polls `check` until it yields `Some`, failing after `SETTLE`.
async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(start.elapsed() < SETTLE, "timed out waiting for {what}");
        sleep(POLL_INTERVAL).await;
    }
}

async fn next_event(
    events: &mut broadcast::Receiver<AppEvent>,
    mut accept: impl FnMut(&AppEvent) -> bool,
) -> AppEvent {
    timeout(SETTLE, async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if accept(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event in time")
}

async fn registered_app(cfg: &InterfaceConfig, pid: u32) -> AppInterface {
    let app = AppInterface::with_pid(cfg, pid).unwrap();
    app.register(u64::from(pid)).await.unwrap();
    app
}

fn start_registry(cfg: &InterfaceConfig) -> AppRegistryHandle {
    spawn_app_registry(cfg).expect("registry binds")
}

// ============================================================================
// App <-> RTM
// ============================================================================

#[tokio::test]
async fn test_monitor_updates_reach_registry_and_logger() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = InterfaceConfig {
        logger_enabled: true,
        ..config(&dir)
    };
    let mut sink = LoggerSink::bind(&cfg).unwrap();
    let registry = start_registry(&cfg);
    let app = registered_app(&cfg, 4100).await;

    let mut mon = app
        .mon_cont_reg(AppMonitorType::Performance, 0.0, 100.0, 1.0)
        .await
        .unwrap();
    assert_ne!(mon.id, 0);
    assert_eq!(mon.val, 0.0);

    for _ in 0..3 {
        app.mon_set(&mut mon, 42.0).unwrap();
    }

    let seen = eventually("monitor value at the registry", || {
        let registry = registry.clone();
        async move {
            registry
                .monitor(4100, mon.id)
                .await
                .filter(|m| m.val == Value::Cont(42.0))
        }
    })
    .await;
    assert_eq!(seen.proc_id, 4100);

    // Each set is mirrored by the App and again by the RTM
    let mut sets = 0;
    while sets < 3 {
        let record = timeout(SETTLE, sink.next()).await.unwrap().unwrap();
        if let LogEntry::Frame(Frame::Fast(FastFrame::MonitorSet { val, .. })) = record.entry {
            assert_eq!(val, Value::Cont(42.0));
            sets += 1;
        }
    }
}

#[tokio::test]
async fn test_registry_mirrors_updates_to_ui() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let (_ui, mut ui_inbox) = Transport::with_inbox(
        &Binding::listen(Endpoint::Unix(dir.path().join("ui.uds"))),
        PeerMode::Server,
    )
    .unwrap();
    let _registry = start_registry(&cfg);
    let app = registered_app(&cfg, 4150).await;
    let mut mon = app
        .mon_cont_reg(AppMonitorType::Performance, 0.0, 100.0, 1.0)
        .await
        .unwrap();
    app.mon_set(&mut mon, 42.0).unwrap();

    // Only what the registry itself sends, not the App's own UI copy
    let registry_ui = Some(Endpoint::Unix(dir.path().join("rtm.app.ui.uds")));
    let mut seen = Vec::new();
    timeout(SETTLE, async {
        loop {
            let datagram = ui_inbox.recv().await.unwrap();
            if datagram.from != registry_ui {
                continue;
            }
            let frame = Frame::decode(&datagram.bytes).unwrap();
            let done = matches!(frame, Frame::Fast(FastFrame::MonitorSet { .. }));
            seen.push(frame);
            if done {
                break;
            }
        }
    })
    .await
    .expect("monitor update mirrored to the UI");

    assert!(matches!(
        seen.first(),
        Some(Frame::Slow(SlowFrame {
            message: SlowMessage::AppRegisterReturn { proc_id: 4150 },
            ..
        }))
    ));
    assert!(matches!(
        seen.last(),
        Some(Frame::Fast(FastFrame::MonitorSet { val: Value::Cont(v), proc_id: 4150, .. })) if *v == 42.0
    ));
    assert!(!seen.iter().any(|f| matches!(
        f,
        Frame::Slow(SlowFrame {
            message: SlowMessage::MonitorRegisterReturn(_),
            ..
        })
    )));
}

#[tokio::test]
async fn test_each_app_gets_its_own_channel() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let registry = start_registry(&cfg);

    let first = registered_app(&cfg, 4201).await;
    let second = registered_app(&cfg, 4202).await;
    assert_eq!(
        first.peer(),
        Some(Endpoint::Unix(dir.path().join("rtm.app.4201.uds")))
    );
    assert_eq!(
        second.peer(),
        Some(Endpoint::Unix(dir.path().join("rtm.app.4202.uds")))
    );

    let a = first
        .knob_disc_reg(AppKnobType::Parallelism, 1, 8, 4)
        .await
        .unwrap();
    let b = second
        .knob_disc_reg(AppKnobType::Parallelism, 1, 8, 2)
        .await
        .unwrap();
    let m = first
        .mon_disc_reg(AppMonitorType::Accuracy, 0, 10, 0.5)
        .await
        .unwrap();

    // One counter for every entity
    let mut ids = vec![a.id, b.id, m.id];
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    let knobs = registry.knobs().await;
    assert_eq!(knobs.len(), 2);
    assert!(knobs.iter().any(|k| k.id == a.id && k.proc_id == 4201));
    assert!(knobs.iter().any(|k| k.id == b.id && k.proc_id == 4202));

    let sessions = registry.sessions().await;
    assert_eq!(sessions.iter().map(|s| s.pid).collect::<Vec<_>>(), vec![4201, 4202]);
    assert_eq!(sessions[0].knobs, 1);
    assert_eq!(sessions[0].monitors, 1);
}

#[tokio::test]
async fn test_concurrent_gets_stay_with_their_app() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let registry = start_registry(&cfg);

    let first = registered_app(&cfg, 4251).await;
    let second = registered_app(&cfg, 4252).await;
    let mut a = first
        .knob_disc_reg(AppKnobType::Parallelism, 0, 100, 11)
        .await
        .unwrap();
    let mut b = second
        .knob_disc_reg(AppKnobType::Parallelism, 0, 100, 22)
        .await
        .unwrap();
    registry.knob_set(4251, a.id, Value::Disc(33)).await.unwrap();

    for _ in 0..5 {
        let (va, vb) = tokio::join!(first.knob_get(&mut a), second.knob_get(&mut b));
        assert_eq!(va.unwrap(), 33);
        assert_eq!(vb.unwrap(), 22);
    }
}

#[tokio::test]
async fn test_discrete_knob_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let registry = start_registry(&cfg);
    let app = registered_app(&cfg, 4300).await;

    let mut knob = app
        .knob_disc_reg(AppKnobType::Parallelism, 0, 10, 5)
        .await
        .unwrap();
    assert_ne!(knob.id, 0);
    assert_eq!((knob.min, knob.max, knob.val), (0, 10, 5));
    assert_eq!(knob.proc_id, 4300);

    assert_eq!(app.knob_get(&mut knob).await.unwrap(), 5);

    registry.knob_set(4300, knob.id, Value::Disc(7)).await.unwrap();
    assert_eq!(app.knob_get(&mut knob).await.unwrap(), 7);
    assert_eq!(knob.val, 7);

    app.knob_max(&mut knob, 9).unwrap();
    eventually("knob bound at the registry", || {
        let registry = registry.clone();
        async move {
            registry
                .knob(4300, knob.id)
                .await
                .filter(|k| k.max == Value::Disc(9))
        }
    })
    .await;

    app.knob_dereg(&knob).unwrap();
    eventually("knob removal", || {
        let registry = registry.clone();
        async move { registry.knobs().await.is_empty().then_some(()) }
    })
    .await;
}

#[tokio::test]
async fn test_unbounded_values_survive_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let _registry = start_registry(&cfg);
    let app = registered_app(&cfg, 4400).await;

    let cont = app
        .knob_cont_reg(AppKnobType::Precision, f32::NEG_INFINITY, f32::INFINITY, 0.5)
        .await
        .unwrap();
    assert_eq!(cont.min, f32::NEG_INFINITY);
    assert_eq!(cont.max, f32::INFINITY);
    assert_eq!(cont.val, 0.5);

    let disc = app
        .mon_disc_reg(AppMonitorType::Error, Disc::MIN, Disc::MAX, 1.0)
        .await
        .unwrap();
    assert_eq!((disc.min, disc.max), (Disc::MIN, Disc::MAX));
}

#[tokio::test]
async fn test_deregister_closes_channel() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let registry = start_registry(&cfg);
    let mut events = registry.subscribe();
    let app = registered_app(&cfg, 4500).await;
    assert!(app.is_registered());

    app.deregister().await.unwrap();
    assert!(!app.is_registered());
    assert_eq!(
        app.peer(),
        Some(Endpoint::Unix(dir.path().join("rtm.app.uds")))
    );

    let event = next_event(&mut events, |e| matches!(e, AppEvent::AppDeregistered { .. })).await;
    assert_eq!(
        event,
        AppEvent::AppDeregistered {
            pid: 4500,
            reason: DeregisterReason::Explicit
        }
    );
    assert!(registry.sessions().await.is_empty());

    // The rendezvous still accepts the App again
    app.register(1).await.unwrap();
    assert_eq!(registry.sessions().await.len(), 1);
}

#[tokio::test]
async fn test_silent_app_loses_its_lease() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = InterfaceConfig {
        lease_secs: 1,
        heartbeat_secs: 60,
        ..config(&dir)
    };
    let registry = start_registry(&cfg);
    let mut events = registry.subscribe();
    let _app = registered_app(&cfg, 4600).await;
    let fanout = dir.path().join("rtm.app.4600.uds");
    assert!(fanout.exists());

    let event = next_event(&mut events, |e| matches!(e, AppEvent::AppDeregistered { .. })).await;
    assert_eq!(
        event,
        AppEvent::AppDeregistered {
            pid: 4600,
            reason: DeregisterReason::LeaseExpired
        }
    );
    assert!(registry.sessions().await.is_empty());
    eventually("fan-out socket removal", || {
        let fanout = fanout.clone();
        async move { (!fanout.exists()).then_some(()) }
    })
    .await;
}

#[tokio::test]
async fn test_heartbeat_keeps_session_alive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = InterfaceConfig {
        lease_secs: 2,
        heartbeat_secs: 1,
        ..config(&dir)
    };
    let registry = start_registry(&cfg);
    let _app = registered_app(&cfg, 4700).await;

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(registry.reap_expired().await.unwrap(), 0);
    assert_eq!(registry.sessions().await.len(), 1);
}

#[tokio::test]
async fn test_calls_time_out_once_registry_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = InterfaceConfig {
        request_timeout_ms: 200,
        ..config(&dir)
    };
    let registry = start_registry(&cfg);
    let app = registered_app(&cfg, 4800).await;
    let mut knob = app
        .knob_disc_reg(AppKnobType::Iterations, 0, 100, 10)
        .await
        .unwrap();

    registry.shutdown();
    sleep(Duration::from_millis(100)).await;

    let err = app.knob_get(&mut knob).await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }), "{err}");
    assert_eq!(knob.val, 10);
}

#[tokio::test]
async fn test_registration_from_wrong_address_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let registry = start_registry(&cfg);
    let mut events = registry.subscribe();

    let (_ui, mut ui_inbox) = Transport::with_inbox(
        &Binding::listen(Endpoint::Unix(dir.path().join("ui.uds"))),
        PeerMode::Server,
    )
    .unwrap();

    // Bound at another App's address, claiming pid 4901
    let impostor = Transport::send_only(&Binding::new(
        Endpoint::Unix(dir.path().join("app.rtm.4999.uds")),
        Endpoint::Unix(dir.path().join("rtm.app.uds")),
    ))
    .unwrap();
    impostor.send(
        &SlowFrame::new(SlowMessage::AppRegister {
            proc_id: 4901,
            ur_id: 0,
        })
        .encode()
        .unwrap(),
    );

    let event = next_event(&mut events, |e| matches!(e, AppEvent::AddressMismatch { .. })).await;
    assert!(matches!(event, AppEvent::AddressMismatch { claimed_pid: 4901, .. }));

    let report = timeout(SETTLE, async {
        loop {
            let datagram = ui_inbox.recv().await.unwrap();
            if let Ok(frame) = SlowFrame::decode(&datagram.bytes) {
                if let SlowMessage::UiRtmError { msg } = frame.message {
                    return msg;
                }
            }
        }
    })
    .await
    .unwrap();
    assert!(report.contains("4901"), "{report}");
    assert!(registry.sessions().await.is_empty());

    // A genuine App still gets in
    let _app = registered_app(&cfg, 4901).await;
    assert_eq!(registry.sessions().await.len(), 1);
}

// ============================================================================
// RTM <-> Device
// ============================================================================

struct DeviceRig {
    _dir: TempDir,
    device: DeviceInterface,
    rtm: RtmDeviceInterface,
    pushed: Arc<AtomicI32>,
}

fn device_rig() -> DeviceRig {
    let dir = tempfile::tempdir().unwrap();
    let arch = dir.path().join("arch.json");
    std::fs::write(&arch, ARCH).unwrap();
    let cfg = config(&dir);

    let device = DeviceInterface::new(&cfg, &arch).unwrap();
    let pushed = Arc::new(AtomicI32::new(-1));
    let seen = Arc::clone(&pushed);
    let freq = device.architecture().resolve("cpu.knobs.freq").unwrap();
    device.add_knob_disc(freq, DeviceKnobType::Frequency, 0, 12, 12, 12, move |v| {
        seen.store(v, Ordering::SeqCst);
    });
    let power = device.architecture().resolve("cpu.mons.power").unwrap();
    let reads = Arc::new(AtomicI32::new(0));
    device.add_monitor_cont(power, DeviceMonitorType::Power, 0.0, 0.0, 10.0, move || {
        let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
        MonitorReading {
            val: n as f32,
            min: 0.0,
            max: 10.0 + n as f32,
        }
    });

    let rtm = RtmDeviceInterface::new(&cfg).unwrap();
    DeviceRig {
        _dir: dir,
        device,
        rtm,
        pushed,
    }
}

#[tokio::test]
async fn test_device_tables_are_destructive_reads() {
    let rig = device_rig();

    assert_eq!(rig.rtm.knob_size::<Disc>().await.unwrap(), 1);
    assert_eq!(rig.rtm.mon_size::<f32>().await.unwrap(), 1);
    assert_eq!(rig.rtm.knob_size::<f32>().await.unwrap(), 0);

    let knobs = rig.rtm.knob_reg::<Disc>().await.unwrap();
    assert_eq!(knobs.len(), 1);
    assert_eq!(knobs[0].id, PackedId::new(1, 0, 0, 0));
    assert_eq!(knobs[0].init, 12);
    // Registration pushes the current value to the hardware
    assert_eq!(rig.pushed.load(Ordering::SeqCst), 12);

    let again = rig.rtm.knob_reg::<Disc>().await.unwrap();
    assert!(again.is_empty(), "second table read must be empty");

    let mons = rig.rtm.mon_reg::<f32>().await.unwrap();
    assert_eq!(mons.len(), 1);
    assert_eq!(mons[0].val, 1.0);
    assert!(rig.rtm.mon_reg::<f32>().await.unwrap().is_empty());

    // Size still reports everything the Device holds
    assert_eq!(rig.rtm.knob_size::<Disc>().await.unwrap(), 1);
}

#[tokio::test]
async fn test_device_set_get_and_architecture() {
    let rig = device_rig();
    let mut knobs = rig.rtm.knob_reg::<Disc>().await.unwrap();
    let mut mons = rig.rtm.mon_reg::<f32>().await.unwrap();

    rig.rtm.knob_set(&mut knobs[0], 3);
    eventually("knob set callback", || {
        let pushed = Arc::clone(&rig.pushed);
        async move { (pushed.load(Ordering::SeqCst) == 3).then_some(()) }
    })
    .await;

    let val = rig.rtm.mon_get(&mut mons[0]).await.unwrap();
    assert_eq!(val, 2.0);
    assert_eq!(mons[0].val, 2.0);
    assert_eq!(mons[0].max, 12.0);

    let arch = rig.rtm.dev_arch_get().await.unwrap();
    assert_eq!(arch.descriptor, "bench-board");
    assert_eq!(&arch, rig.device.architecture());

    rig.rtm.mon_dereg(&mons).unwrap();
    eventually("monitor removal", || {
        let rtm = &rig.rtm;
        async move { (rtm.mon_size::<f32>().await.ok()? == 0).then_some(()) }
    })
    .await;
    assert_eq!(rig.device.monitors().len(), 0);
    assert_eq!(rig.device.knobs()[0].val, Value::Disc(3));
    assert_eq!(rig.device.knobs()[0].kind(), ScalarKind::Discrete);
}
