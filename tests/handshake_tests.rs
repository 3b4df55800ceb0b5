//! Integration tests for the three-way handshake and four-way teardown,
//! run over real loopback UDP sockets.

use std::net::SocketAddr;
use std::thread;

use rtcp::{Config, Connection, State};

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[test]
fn clean_handshake_reaches_established_on_both_sides() {
    let server_addr = addr(32100);
    let client_addr = addr(32101);

    let server = thread::spawn(move || {
        let cfg = Config::new(server_addr, client_addr, 5000);
        let mut conn = Connection::new(cfg).unwrap();
        conn.accept().unwrap();
        assert_eq!(conn.state(), State::Established);
        conn.recv().unwrap();
    });

    thread::sleep(std::time::Duration::from_millis(50));

    let cfg = Config::new(client_addr, server_addr, 5000);
    let mut client = Connection::new(cfg).unwrap();
    client.connect().unwrap();
    assert_eq!(client.state(), State::Established);

    client.send(b"hi").unwrap();
    client.close(2).unwrap();
    assert_eq!(client.state(), State::Closed);

    server.join().unwrap();
}

#[test]
fn handshake_completes_under_heavy_loss() {
    let server_addr = addr(32110);
    let client_addr = addr(32111);

    let server = thread::spawn(move || {
        let cfg = Config::new(server_addr, client_addr, 5000).with_fault_injection(5, 70, 0);
        let mut conn = Connection::new(cfg).unwrap();
        conn.accept().unwrap();
        conn.recv().unwrap();
    });

    thread::sleep(std::time::Duration::from_millis(50));

    let cfg = Config::new(client_addr, server_addr, 5000).with_fault_injection(5, 70, 0);
    let mut client = Connection::new(cfg).unwrap();
    client.connect().unwrap();
    assert_eq!(client.state(), State::Established);

    client.send(b"ok").unwrap();
    client.close(2).unwrap();

    server.join().unwrap();
}

#[test]
fn second_connect_on_established_connection_errors() {
    let server_addr = addr(32120);
    let client_addr = addr(32121);

    let server = thread::spawn(move || {
        let cfg = Config::new(server_addr, client_addr, 5000);
        let mut conn = Connection::new(cfg).unwrap();
        conn.accept().unwrap();
        conn.recv().unwrap();
    });

    thread::sleep(std::time::Duration::from_millis(50));

    let cfg = Config::new(client_addr, server_addr, 5000);
    let mut client = Connection::new(cfg).unwrap();
    client.connect().unwrap();

    assert!(client.connect().is_err());

    client.send(b"x").unwrap();
    client.close(1).unwrap();
    server.join().unwrap();
}
