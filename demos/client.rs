use std::net::SocketAddr;

use rtcp::{Config, Connection};

fn main() {
    let src: SocketAddr = "127.0.0.1:9091".parse().unwrap();
    let dst: SocketAddr = "127.0.0.1:9090".parse().unwrap();

    let cfg = Config::new(src, dst, 5000);
    let mut conn = Connection::new(cfg).unwrap();

    println!(">>> Trying to connect to server...");
    conn.connect().unwrap();
    println!(">>> Connected!");

    let payload = vec![0xAAu8; 100_000];
    conn.send(&payload).unwrap();
    println!(">>> Sent {} bytes", payload.len());

    conn.close(payload.len() as u64).unwrap();
    println!(">>> Closed");
}
