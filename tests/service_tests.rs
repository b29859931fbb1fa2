//! Integration tests for the BluetoothService → actor → transport pipeline.
//!
//! Every test drives the public handle against an instrumented mock
//! transport or the simulated peripheral.

mod common;
use common::{
    connect_ready, next_error, settle, spawn_service, wait_for_state, MockTransport,
    TransportCall, STEP_TIMEOUT,
};

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use sym_ble::domain::error::{BleError, DisconnectReason, RejectReason};
use sym_ble::domain::models::{
    AppEvent, Attribute, ConnectionState, CurrentTime, DecodedValue, DeviceHandle, Operation, Temperature,
};
use sym_ble::infrastructure::bluetooth::catalog::CapabilityCatalog;
use sym_ble::infrastructure::bluetooth::queue::CommandOutput;
use sym_ble::infrastructure::bluetooth::simulator::{
    sym_pixl_services, SimulatedPeripheral, BUTTON_CLICK_HANDLE, CURRENT_TIME_HANDLE,
    INTEGER_HANDLE, TEMPERATURE_HANDLE,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Wait for the next `Ready` status, failing on any error reported first
async fn ready_without_error(app_events: &mut mpsc::UnboundedReceiver<AppEvent>) {
    loop {
        let event = timeout(STEP_TIMEOUT, app_events.recv())
            .await
            .expect("timed out waiting for ready")
            .expect("event stream closed");
        match event {
            AppEvent::Error(e) => panic!("unexpected error before ready: {}", e),
            AppEvent::ConnectionStatus(ConnectionState::Ready) => return,
            _ => {}
        }
    }
}

async fn wait_for_in_flight(transport: &MockTransport, call: TransportCall) {
    timeout(STEP_TIMEOUT, async {
        while transport.in_flight() == 0 || !transport.calls().contains(&call) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{:?} never reached the transport", call));
}

// ── Session lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn connect_reaches_ready_and_runs_bootstrap_in_order() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);

    connect_ready(&service).await;

    assert_eq!(
        transport.calls(),
        vec![
            TransportCall::Connect("pixl".to_string()),
            TransportCall::Discover,
            TransportCall::Subscribe(BUTTON_CLICK_HANDLE),
            TransportCall::Subscribe(CURRENT_TIME_HANDLE),
            TransportCall::Read(TEMPERATURE_HANDLE),
        ]
    );
    let observed = service.observe();
    assert!(observed.connected());
    assert_eq!(observed.temperature_text(), "20.5");
    assert_eq!(service.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn commands_before_ready_are_rejected_without_transport_calls() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);

    let not_ready = BleError::CommandRejected(RejectReason::NotReady(ConnectionState::Idle));
    assert_eq!(service.read_temperature().unwrap_err(), not_ready);
    assert_eq!(service.send_integer(1).unwrap_err(), not_ready);
    assert_eq!(service.read_current_time().unwrap_err(), not_ready);
    assert_eq!(
        service.set_current_time(CurrentTime::default()).unwrap_err(),
        not_ready
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn connect_retries_once_before_succeeding() {
    let (transport, events) = MockTransport::sym_pixl();
    transport.fail_next_connects(1);
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);

    connect_ready(&service).await;

    let calls = transport.calls();
    assert_eq!(calls[0], TransportCall::Connect("pixl".to_string()));
    assert_eq!(calls[1], TransportCall::Connect("pixl".to_string()));
    assert_eq!(calls[2], TransportCall::Discover);
}

#[tokio::test]
async fn exhausted_retries_fail_and_allow_a_new_connect() {
    let (transport, events) = MockTransport::sym_pixl();
    transport.fail_next_connects(2);
    let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);

    service.connect(DeviceHandle::new("pixl"));
    let err = next_error(&mut app_events).await;
    assert!(
        matches!(err, BleError::ConnectionFailed { attempts: 2, .. }),
        "unexpected error {:?}",
        err
    );
    wait_for_state(&service, ConnectionState::Idle).await;
    assert_eq!(transport.calls().len(), 2);

    connect_ready(&service).await;
    assert!(service.is_connected());
}

#[tokio::test]
async fn connect_while_active_is_ignored() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    service.connect(DeviceHandle::new("other"));
    let result = settle(service.read_temperature().unwrap()).await;
    assert!(result.is_ok());

    let connects = transport
        .calls()
        .iter()
        .filter(|call| matches!(call, TransportCall::Connect(_)))
        .count();
    assert_eq!(connects, 1);
    assert_eq!(service.state(), ConnectionState::Ready);
}

// ── Capability validation ─────────────────────────────────────

#[tokio::test]
async fn each_missing_requirement_is_unsupported_and_disconnects() {
    let catalog = CapabilityCatalog::sym_pixl();
    let full = sym_pixl_services();

    let mut variants = Vec::new();
    for index in 0..full.len() {
        let mut services = full.clone();
        services.remove(index);
        variants.push(services);
    }
    for requirement in catalog.requirements() {
        let services = full
            .iter()
            .cloned()
            .map(|mut service| {
                service
                    .characteristics
                    .retain(|c| c.uuid != requirement.characteristic);
                service
            })
            .collect::<Vec<_>>();
        variants.push(services);
    }
    assert_eq!(variants.len(), 6);

    for services in variants {
        let (transport, events) = MockTransport::new(services);
        let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);

        service.connect(DeviceHandle::new("pixl"));
        let err = next_error(&mut app_events).await;
        assert!(
            matches!(err, BleError::UnsupportedDevice { ref missing } if !missing.is_empty()),
            "unexpected error {:?}",
            err
        );
        wait_for_state(&service, ConnectionState::Idle).await;

        let calls = transport.calls();
        assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
        assert!(!calls.iter().any(TransportCall::is_command));
        assert!(!service.is_connected());
    }
}

// ── Command queue ─────────────────────────────────────────────

#[tokio::test]
async fn disconnect_cancels_pending_commands() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    transport.hold();
    let read = service.read_temperature().unwrap();
    let write = service.send_integer(5).unwrap();
    let time = service.read_current_time().unwrap();

    timeout(STEP_TIMEOUT, async {
        while transport.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("read never reached the transport");

    service.disconnect();
    assert_eq!(settle(read).await, Err(BleError::Cancelled));
    assert_eq!(settle(write).await, Err(BleError::Cancelled));
    assert_eq!(settle(time).await, Err(BleError::Cancelled));
    wait_for_state(&service, ConnectionState::Idle).await;

    transport.release();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let calls = transport.calls();
    assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
    assert!(!calls.contains(&TransportCall::Write(INTEGER_HANDLE, vec![5, 0, 0, 0])));

    assert_eq!(
        service.read_temperature().unwrap_err(),
        BleError::CommandRejected(RejectReason::NotReady(ConnectionState::Idle))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_overlap_transport_operations() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    let mut callers = Vec::new();
    for caller in 0..8u32 {
        let service = service.clone();
        callers.push(tokio::spawn(async move {
            for round in 0..5u32 {
                let receipt = if (caller + round) % 2 == 0 {
                    service.read_temperature()
                } else {
                    service.send_integer(caller * 100 + round)
                };
                settle(receipt.unwrap()).await.unwrap();
            }
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    assert_eq!(transport.max_in_flight(), 1);
    let commands = transport
        .calls()
        .iter()
        .filter(|call| call.is_command())
        .count();
    // 3 bootstrap commands plus 40 from the callers
    assert_eq!(commands, 43);
}

#[tokio::test]
async fn failed_write_reports_command_failed_and_queue_moves_on() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    transport.fail_writes(true);
    let write = service.send_integer(9).unwrap();
    let read = service.read_temperature().unwrap();

    match settle(write).await {
        Err(BleError::CommandFailed {
            attribute,
            operation,
            ..
        }) => {
            assert_eq!(attribute, Attribute::Integer);
            assert_eq!(operation, Operation::Write);
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert_eq!(
        settle(read).await,
        Ok(CommandOutput::Read(DecodedValue::Temperature(
            Temperature::from_tenths(205)
        )))
    );
    assert_eq!(service.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn malformed_read_fails_with_codec_error() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    transport.set_read_value(TEMPERATURE_HANDLE, vec![100]);
    let result = settle(service.read_temperature().unwrap()).await;
    assert!(matches!(result, Err(BleError::Codec(_))));
    assert_eq!(service.observe().temperature_text(), "20.5");
}

#[tokio::test]
async fn writes_carry_wire_payloads() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    settle(service.send_integer(0x0102_0304).unwrap())
        .await
        .unwrap();

    // 2021-12-26 was a Sunday
    let when = NaiveDate::from_ymd_opt(2021, 12, 26)
        .unwrap()
        .and_hms_opt(18, 30, 15)
        .unwrap();
    settle(service.set_date(&when).unwrap()).await.unwrap();

    let calls = transport.calls();
    assert!(calls.contains(&TransportCall::Write(INTEGER_HANDLE, vec![4, 3, 2, 1])));
    assert!(calls.contains(&TransportCall::Write(
        CURRENT_TIME_HANDLE,
        vec![0xE5, 0x07, 12, 26, 18, 30, 15, 7, 0, 0]
    )));
}

// ── Link events and notifications ─────────────────────────────

#[tokio::test]
async fn link_loss_reports_reason_and_returns_to_idle() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;

    transport.drop_link(DisconnectReason::NotSupported);
    assert_eq!(
        next_error(&mut app_events).await,
        BleError::DeviceDisconnected {
            reason: DisconnectReason::NotSupported
        }
    );
    wait_for_state(&service, ConnectionState::Idle).await;

    assert!(!service.is_connected());
    assert!(!transport.calls().contains(&TransportCall::Disconnect));

    connect_ready(&service).await;
}

#[tokio::test]
async fn link_loss_from_own_disconnect_does_not_reach_next_session() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;
    while app_events.try_recv().is_ok() {}

    transport.lose_link_on_disconnect(true);
    service.disconnect();
    service.connect(DeviceHandle::new("pixl"));

    ready_without_error(&mut app_events).await;
    let mut temperature = service.observe().watch_temperature();
    timeout(STEP_TIMEOUT, temperature.wait_for(|t| t.is_some()))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(service.is_connected());
    while let Ok(event) = app_events.try_recv() {
        assert!(!matches!(event, AppEvent::Error(_)), "stale {:?}", event);
    }
    assert_eq!(
        transport
            .calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn link_loss_while_connecting_leaves_outcome_to_connect() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);

    transport.hold();
    service.connect(DeviceHandle::new("pixl"));
    wait_for_in_flight(&transport, TransportCall::Connect("pixl".to_string())).await;

    transport.drop_link(DisconnectReason::LinkLoss);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.state(), ConnectionState::Connecting);

    transport.release();
    ready_without_error(&mut app_events).await;
    assert!(service.is_connected());
}

#[tokio::test]
async fn link_loss_during_discovery_fails_the_connection() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, mut app_events) = spawn_service(Arc::clone(&transport), events);

    transport.hold();
    service.connect(DeviceHandle::new("pixl"));
    wait_for_in_flight(&transport, TransportCall::Connect("pixl".to_string())).await;
    transport.release_one();
    wait_for_state(&service, ConnectionState::Discovering).await;
    wait_for_in_flight(&transport, TransportCall::Discover).await;

    transport.drop_link(DisconnectReason::LinkLoss);
    match next_error(&mut app_events).await {
        BleError::ConnectionFailed {
            device,
            attempts,
            reason,
        } => {
            assert_eq!(device, "pixl");
            assert_eq!(attempts, 1);
            assert_eq!(reason, "link lost while discovering: link loss");
        }
        other => panic!("expected a connection failure, got {:?}", other),
    }
    wait_for_state(&service, ConnectionState::Idle).await;
    assert!(!transport.calls().contains(&TransportCall::Disconnect));

    transport.release();
    connect_ready(&service).await;
}

#[tokio::test]
async fn notifications_overwrite_latest_values() {
    let (transport, events) = MockTransport::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&transport), events);
    connect_ready(&service).await;
    let observed = service.observe();
    assert_eq!(observed.current_time_text(), "DD / MM / YY hh:mm:ss");

    transport.notify(BUTTON_CLICK_HANDLE, vec![3]);
    transport.notify(BUTTON_CLICK_HANDLE, vec![7]);
    transport.notify(
        CURRENT_TIME_HANDLE,
        vec![0xE5, 0x07, 12, 26, 18, 30, 15, 7, 0, 0],
    );

    let mut time = observed.watch_current_time();
    timeout(STEP_TIMEOUT, time.wait_for(|t| t.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(observed.button_clicks(), 7);
    assert_eq!(observed.current_time_text(), "26/12/2021 18:30:15");
}

// ── Simulated peripheral ──────────────────────────────────────

#[tokio::test]
async fn simulated_peripheral_end_to_end() {
    let (peripheral, events) = SimulatedPeripheral::sym_pixl();
    let (service, _app_events) = spawn_service(Arc::clone(&peripheral), events);
    peripheral.set_temperature_tenths(100);
    connect_ready(&service).await;

    let observed = service.observe();
    assert_eq!(observed.temperature_text(), "10.0");

    settle(service.send_integer(42).unwrap()).await.unwrap();
    assert_eq!(peripheral.last_integer(), Some(42));

    let time = CurrentTime {
        year: 2024,
        month: 2,
        day: 29,
        hour: 23,
        minute: 59,
        second: 58,
        weekday: 4,
    };
    settle(service.set_current_time(time).unwrap())
        .await
        .unwrap();
    assert_eq!(
        settle(service.read_current_time().unwrap()).await,
        Ok(CommandOutput::Read(DecodedValue::CurrentTime(time)))
    );
    assert_eq!(observed.current_time(), Some(time));

    assert_eq!(peripheral.press_button(), 1);
    let mut clicks = observed.watch_button_clicks();
    timeout(STEP_TIMEOUT, clicks.wait_for(|count| *count == 1))
        .await
        .unwrap()
        .unwrap();

    service.disconnect();
    wait_for_state(&service, ConnectionState::Idle).await;
    assert!(!peripheral.is_connected());
    assert_eq!(observed.button_clicks(), 1);
}
