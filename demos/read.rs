use foxess_remote_control::{
    InverterConfig, ModbusGateway, PollOutcome, PolledGateway, RegisterGateway,
};

/// Poll the remote control registers once and print them.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "inverter.json".to_string());
    let config = InverterConfig::load(&config_path)?;

    let mut gateway = ModbusGateway::new(&config.connection);
    let addresses = config.addresses.tracked_addresses();
    gateway.track(&addresses);

    if gateway.poll().await? == PollOutcome::Disconnected {
        anyhow::bail!("Couldn't reach {}", gateway.socket_addr());
    }

    for address in addresses {
        match gateway.read(address, true) {
            Some(value) => println!("{address}: {value}"),
            None => println!("{address}: unavailable"),
        }
    }
    Ok(())
}
