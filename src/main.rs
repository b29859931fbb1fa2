use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use sym_ble::domain::models::{AppEvent, DeviceHandle, MessageSeverity};
use sym_ble::domain::settings::SettingsService;
use sym_ble::infrastructure::bluetooth::catalog::CapabilityCatalog;
use sym_ble::infrastructure::bluetooth::connection::ConnectionConfig;
use sym_ble::infrastructure::bluetooth::simulator::SimulatedPeripheral;
use sym_ble::infrastructure::bluetooth::BluetoothService;
use sym_ble::infrastructure::logging;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const DEMO_DEVICE: &str = "sym-pixl-simulated";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting SYM BLE manager");

    let catalog = CapabilityCatalog::from_settings(&settings_service.get().catalog)?;
    let config = ConnectionConfig::from(settings_service.get());

    let (peripheral, transport_events) = SimulatedPeripheral::sym_pixl();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let service = BluetoothService::spawn(
        Arc::clone(&peripheral),
        transport_events,
        catalog,
        config,
        event_tx,
    );

    let event_logger = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::ConnectionStatus(state) => debug!("Status: {}", state),
                AppEvent::Error(e) => error!("Device error: {}", e),
                AppEvent::LogMessage(status) => match status.severity {
                    MessageSeverity::Warning => warn!("{}", status.message),
                    MessageSeverity::Error => error!("{}", status.message),
                    MessageSeverity::Info | MessageSeverity::Success => {
                        info!("{}", status.message)
                    }
                },
            }
        }
    });

    let device = DeviceHandle::new(
        settings_service
            .get()
            .last_device
            .clone()
            .unwrap_or_else(|| DEMO_DEVICE.to_string()),
    );
    service.connect(device.clone());

    let observed = service.observe();
    let mut session = observed.watch_session();
    timeout(STEP_TIMEOUT, session.wait_for(|s| s.state.is_ready()))
        .await
        .context("timed out waiting for the device to become ready")??;

    let temperature = service.read_temperature()?.await?;
    info!("Temperature read: {:?}", temperature);

    service.send_integer(42)?.await?;
    info!("Integer written, device holds {:?}", peripheral.last_integer());

    service.set_date(&Local::now())?.await?;
    service.read_current_time()?.await?;

    peripheral.press_button();
    peripheral.press_button();
    let mut clicks = observed.watch_button_clicks();
    timeout(STEP_TIMEOUT, clicks.wait_for(|count| *count >= 2))
        .await
        .context("timed out waiting for button notifications")??;

    info!("Connected: {}", observed.connected());
    info!("Temperature: {}", observed.temperature_text());
    info!("Button clicks: {}", observed.button_clicks());
    info!("Current time: {}", observed.current_time_text());

    service.disconnect();
    timeout(STEP_TIMEOUT, session.wait_for(|s| s.state.is_idle()))
        .await
        .context("timed out waiting for disconnection")??;

    settings_service.remember_device(device.as_str())?;

    drop(service);
    let _ = event_logger.await;
    info!("Done");
    Ok(())
}
