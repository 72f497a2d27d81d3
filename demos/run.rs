use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use foxess_remote_control::{Command, InverterConfig, RemoteControlMode, build_driver};

/// Usage: run <config.json> <disable|force_charge|force_discharge> [power W]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "inverter.json".to_string());
    let mode: RemoteControlMode = args.next().as_deref().unwrap_or("disable").parse()?;
    let power: Option<f64> = args.next().map(|p| p.parse()).transpose()?;

    let config = InverterConfig::load(&config_path)?;
    let mut driver = build_driver(&config);

    let (tx, rx) = mpsc::channel(8);
    match mode {
        RemoteControlMode::ForceCharge => tx.send(Command::SetChargePower(power)).await?,
        RemoteControlMode::ForceDischarge => tx.send(Command::SetDischargePower(power)).await?,
        RemoteControlMode::Disable => {}
    }
    tx.send(Command::SetMode(mode)).await?;

    let shutdown = Arc::new(Notify::new());
    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move {
        driver.run(rx, shutdown_clone).await;
        driver
    });

    tokio::signal::ctrl_c().await?;
    // Hand control back to the inverter before leaving
    tx.send(Command::SetMode(RemoteControlMode::Disable)).await?;
    shutdown.notify_one();

    let driver = handle.await?;
    tracing::info!(
        "Stopped in mode {}, remote control {:?}",
        driver.manager().mode(),
        driver.manager().remote_control_state()
    );
    Ok(())
}
