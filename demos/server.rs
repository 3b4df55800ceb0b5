use std::net::SocketAddr;

use rtcp::{Config, Connection};

fn main() {
    let src: SocketAddr = "127.0.0.1:9090".parse().unwrap();
    let dst: SocketAddr = "127.0.0.1:9091".parse().unwrap();

    let cfg = Config::new(src, dst, 5000);
    let mut conn = Connection::new(cfg).unwrap();

    println!(">>> Waiting for incoming connections...");
    conn.accept().unwrap();
    println!(">>> Connection accepted");

    let data = conn.recv().unwrap();
    println!(
        "\n>>> Read {} bytes, first byte: {:#04x}\n",
        data.len(),
        data.first().copied().unwrap_or(0)
    );
}
