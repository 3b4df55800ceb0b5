//! End-to-end transfer tests over real loopback UDP sockets, covering the
//! clean-path and lossy/corrupting scenarios.

use std::net::SocketAddr;
use std::thread;

use rtcp::Config;
use rtcp::Connection;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn run_transfer(
    server_port: u16,
    client_port: u16,
    payload: Vec<u8>,
    server_debug_option: u8,
    loss: u8,
    corruption: u8,
) -> Vec<u8> {
    let server_addr = addr(server_port);
    let client_addr = addr(client_port);
    let expected_len = payload.len();

    let server = thread::spawn(move || {
        let cfg = Config::new(server_addr, client_addr, 5000)
            .with_fault_injection(server_debug_option, loss, corruption);
        let mut conn = Connection::new(cfg).unwrap();
        conn.accept().unwrap();
        conn.recv().unwrap()
    });

    thread::sleep(std::time::Duration::from_millis(50));

    let cfg = Config::new(client_addr, server_addr, 5000)
        .with_fault_injection(server_debug_option, loss, corruption);
    let mut client = Connection::new(cfg).unwrap();
    client.connect().unwrap();
    client.send(&payload).unwrap();
    client.close(expected_len as u64).unwrap();

    server.join().unwrap()
}

#[test]
fn clean_transfer_of_100_000_bytes() {
    let _ = env_logger::try_init();
    let payload = vec![0xAAu8; 100_000];
    let received = run_transfer(32200, 32201, payload.clone(), 1, 0, 0);
    assert_eq!(received.len(), 100_000);
    assert!(received.iter().all(|&b| b == 0xAA));
}

#[test]
fn transfer_survives_fifty_percent_ack_loss() {
    let payload = vec![0x42u8; 20_000];
    let received = run_transfer(32210, 32211, payload.clone(), 4, 50, 0);
    assert_eq!(received, payload);
}

#[test]
fn transfer_survives_fifty_percent_data_loss() {
    let payload = vec![0x7Fu8; 20_000];
    let received = run_transfer(32220, 32221, payload.clone(), 5, 50, 0);
    assert_eq!(received, payload);
}

#[test]
fn transfer_survives_data_corruption_with_fast_retransmit() {
    let payload = vec![0x13u8; 20_000];
    let received = run_transfer(32230, 32231, payload.clone(), 3, 0, 20);
    assert_eq!(received, payload);
}
