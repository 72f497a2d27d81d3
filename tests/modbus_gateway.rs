use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use foxess_remote_control::{
    Command, ConnectionConfig, InverterConfig, ModbusGateway, PollOutcome, PolledGateway,
    RegisterGateway, RegisterType, RemoteControlMode, build_driver,
};

type Registers = Arc<Mutex<HashMap<u16, u16>>>;

/// Just enough of a modbus TCP server to answer reads and single writes.
async fn start_server(registers: Registers) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, registers.clone()));
        }
    });
    addr
}

async fn serve(mut stream: TcpStream, registers: Registers) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let response = respond(&pdu, &registers);
        let mut frame = Vec::with_capacity(7 + response.len());
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn respond(pdu: &[u8], registers: &Registers) -> Vec<u8> {
    let function = pdu[0];
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let value = u16::from_be_bytes([pdu[3], pdu[4]]);
    let mut registers = registers.lock().unwrap();
    match function {
        // Read holding / input registers
        0x03 | 0x04 => {
            let values: Option<Vec<u16>> = (0..value)
                .map(|offset| registers.get(&(address + offset)).copied())
                .collect();
            match values {
                Some(values) => {
                    let mut out = vec![function, (value * 2) as u8];
                    for v in values {
                        out.extend_from_slice(&v.to_be_bytes());
                    }
                    out
                }
                // Illegal data address
                None => vec![function | 0x80, 0x02],
            }
        }
        // Write single register
        0x06 => {
            registers.insert(address, value);
            pdu[..5].to_vec()
        }
        _ => vec![function | 0x80, 0x01],
    }
}

fn registers(values: &[(u16, i32)]) -> Registers {
    let map = values
        .iter()
        .map(|(address, value)| (*address, *value as i16 as u16))
        .collect();
    Arc::new(Mutex::new(map))
}

fn connection(address: SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        address,
        slave: 247,
        register_type: RegisterType::Input,
        max_read: 2,
        timeout_secs: 2,
    }
}

#[tokio::test]
async fn polls_tracked_registers() {
    let registers = registers(&[(11000, 3500), (11001, -250), (11036, 80)]);
    let addr = start_server(registers.clone()).await;
    let mut gateway = ModbusGateway::new(&connection(addr));
    gateway.track(&[11036, 11000, 11001]);

    assert_eq!(gateway.poll().await.unwrap(), PollOutcome::BecameConnected);
    assert!(gateway.is_connected());
    assert_eq!(gateway.read(11000, false), Some(3500));
    assert_eq!(gateway.read(11001, true), Some(-250));
    assert_eq!(gateway.read(11036, false), Some(80));
    assert_eq!(gateway.read(11002, false), None);

    registers.lock().unwrap().insert(11036, 81);
    assert_eq!(gateway.poll().await.unwrap(), PollOutcome::Polled);
    assert_eq!(gateway.read(11036, false), Some(81));
}

#[tokio::test]
async fn writes_single_registers() {
    let registers = registers(&[]);
    let addr = start_server(registers.clone()).await;
    let mut gateway = ModbusGateway::new(&connection(addr));

    gateway.poll().await.unwrap();
    gateway.write_register(44002, 62536).await.unwrap();

    assert_eq!(registers.lock().unwrap().get(&44002), Some(&62536));
}

#[tokio::test]
async fn refused_reads_become_unknown_but_stay_connected() {
    let registers = registers(&[(11036, 80)]);
    let addr = start_server(registers).await;
    let mut gateway = ModbusGateway::new(&connection(addr));
    gateway.track(&[11036, 50000]);

    assert_eq!(gateway.poll().await.unwrap(), PollOutcome::BecameConnected);
    assert!(gateway.is_connected());
    assert_eq!(gateway.read(11036, false), Some(80));
    assert_eq!(gateway.read(50000, false), None);
}

#[tokio::test]
async fn unreachable_inverter_is_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut gateway = ModbusGateway::new(&connection(addr));
    gateway.track(&[11036]);

    assert_eq!(gateway.poll().await.unwrap(), PollOutcome::Disconnected);
    assert!(!gateway.is_connected());
    assert!(gateway.write_register(44000, 0).await.is_err());
}

#[tokio::test]
async fn force_discharge_over_modbus() {
    let registers = registers(&[(41000, 0), (44012, -4000), (11036, 60)]);
    let addr = start_server(registers.clone()).await;
    let json = format!(
        r#"{{
            "connection": {{ "address": "{addr}", "max_read": 2, "timeout_secs": 2 }},
            "poll_rate_secs": 10,
            "addresses": {{
                "remote_enable": 44000,
                "timeout_set": 44001,
                "active_power": 44002,
                "work_mode": 41000,
                "battery_soc": 11036,
                "ac_power_limit_down": 44012
            }}
        }}"#
    );
    let config = InverterConfig::from_json(&json).unwrap();
    let mut driver = build_driver(&config);

    driver.tick().await;
    assert!(driver.manager().gateway().is_connected());
    assert_eq!(registers.lock().unwrap().get(&44000), Some(&0));

    driver
        .handle(Command::SetMode(RemoteControlMode::ForceDischarge))
        .await;

    let registers = registers.lock().unwrap();
    assert_eq!(registers.get(&41000), Some(&1));
    assert_eq!(registers.get(&44001), Some(&20));
    assert_eq!(registers.get(&44000), Some(&1));
    assert_eq!(registers.get(&44002), Some(&4000));
}
