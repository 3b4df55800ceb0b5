//! Connection FSM: three-way handshake, four-way teardown, and the public
//! `connect`/`send`/`recv`/`close` API (spec §4.2, §6).

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::err::Error;
use crate::fault::{DebugOption, Direction, FaultInjector};
use crate::receiver::{self, ReceiverConfig};
use crate::segment::{Flags, Segment};
use crate::sender::{self, SenderConfig};

/// States exposed by the FSM, covering both the client (`Closed -> SynSent
/// -> Established -> FinWait -> Closed`) and server (`Closed -> Listen ->
/// SynRcvd -> Established -> CloseWait -> LastAck -> Closed`) role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait,
    CloseWait,
    LastAck,
}

/// Constructor parameters (spec §6). `mss`/windows/fault-injection knobs all
/// have the defaults the spec lists; only the four endpoint fields and
/// `mss` are required.
#[derive(Debug, Clone)]
pub struct Config {
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    pub mss: usize,
    pub send_window: u16,
    pub recv_window: u16,
    pub corruption: u8,
    pub loss: u8,
    pub debug_option: u8,
    /// Consecutive retransmission-timeout ceiling before `send` declares
    /// the connection lost (spec §9 open question; see DESIGN.md).
    pub max_retransmits: u32,
}

impl Config {
    pub fn new(src_addr: SocketAddr, dst_addr: SocketAddr, mss: usize) -> Self {
        Config {
            src_addr,
            dst_addr,
            mss,
            send_window: 65535,
            recv_window: 65535,
            corruption: 0,
            loss: 0,
            debug_option: 1,
            max_retransmits: 16,
        }
    }

    pub fn with_fault_injection(mut self, debug_option: u8, loss: u8, corruption: u8) -> Self {
        self.debug_option = debug_option;
        self.loss = loss;
        self.corruption = corruption;
        self
    }

    pub fn with_windows(mut self, send_window: u16, recv_window: u16) -> Self {
        self.send_window = send_window;
        self.recv_window = recv_window;
        self
    }

    pub fn with_max_retransmits(mut self, max_retransmits: u32) -> Self {
        self.max_retransmits = max_retransmits;
        self
    }
}

pub struct Connection {
    socket: UdpSocket,
    cfg: Config,
    state: State,
    client_isn: u32,
    server_isn: u32,
    fault: FaultInjector,
    advertised_window: Arc<AtomicU16>,
}

impl Connection {
    /// Binds the local endpoint and connects the UDP socket to the peer
    /// (collapsing the teacher's separate send/recv sockets into one, per
    /// SPEC_FULL.md §3 — neither role needs the distinction once both
    /// directions share the same connected datagram socket).
    pub fn new(cfg: Config) -> Result<Self, Error> {
        let socket = UdpSocket::bind(cfg.src_addr)?;
        socket.connect(cfg.dst_addr)?;

        let fault = FaultInjector::new(
            DebugOption::from_code(cfg.debug_option),
            cfg.loss,
            cfg.corruption,
        );

        Ok(Connection {
            socket,
            cfg,
            state: State::Closed,
            client_isn: 0,
            server_isn: 0,
            fault,
            advertised_window: Arc::new(AtomicU16::new(65535)),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn src_port(&self) -> u16 {
        self.cfg.src_addr.port()
    }

    fn dst_port(&self) -> u16 {
        self.cfg.dst_addr.port()
    }

    /// Active open: three-way handshake (spec §4.2).
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::AlreadyConnected);
        }

        self.state = State::SynSent;
        self.client_isn = rand::thread_rng().gen_range(0..=0xFFFFu32);

        self.socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        let syn = Segment {
            src_port: self.src_port(),
            dst_port: self.dst_port(),
            seq_no: self.client_isn,
            ack_no: 0,
            flags: Flags::syn(),
            rcv_window: self.cfg.recv_window,
            payload: Vec::new(),
        };

        let mut buf = vec![0u8; 1500];
        loop {
            if !self.fault.should_drop(Direction::Data) {
                self.socket.send(&syn.encode())?;
            }
            debug!("connect: sent SYN (client_isn={})", self.client_isn);

            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => continue, // timed out, retransmit SYN
            };

            if !Segment::is_valid(&buf[..n]) || self.fault.should_corrupt(Direction::Ack) {
                continue;
            }
            let Some(seg) = Segment::decode(&buf[..n]) else { continue };

            if seg.flags.syn && seg.flags.ack {
                self.server_isn = seg.seq_no;
                self.state = State::Established;

                let final_syn = Segment {
                    seq_no: self.client_isn,
                    ack_no: self.server_isn,
                    ..syn.clone()
                };
                self.socket.send(&final_syn.encode())?;

                info!(
                    "connect: established (client_isn={}, server_isn={})",
                    self.client_isn, self.server_isn
                );
                return Ok(());
            }
        }
    }

    /// Passive open: awaits a SYN, then the three-way handshake completes
    /// (spec §4.2).
    pub fn accept(&mut self) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::AlreadyConnected);
        }

        self.state = State::Listen;
        self.socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        let mut buf = vec![0u8; 1500];

        // Wait for the client's initial SYN.
        loop {
            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => continue,
            };

            if !Segment::is_valid(&buf[..n]) || self.fault.should_corrupt(Direction::Data) {
                continue;
            }
            let Some(seg) = Segment::decode(&buf[..n]) else { continue };

            if seg.flags.syn && !seg.flags.ack {
                self.client_isn = seg.seq_no;
                self.server_isn = rand::thread_rng().gen_range(0..=0xFFFFu32);
                self.state = State::SynRcvd;
                debug!(
                    "accept: SYN received (client_isn={}), server_isn={}",
                    self.client_isn, self.server_isn
                );
                break;
            }
        }

        let syn_ack = Segment {
            src_port: self.src_port(),
            dst_port: self.dst_port(),
            seq_no: self.server_isn,
            ack_no: self.client_isn.wrapping_add(1),
            flags: Flags::syn_ack(),
            rcv_window: self.cfg.recv_window,
            payload: Vec::new(),
        };

        loop {
            if !self.fault.should_drop(Direction::Ack) {
                self.socket.send(&syn_ack.encode())?;
            }

            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => continue, // timed out, resend SYN+ACK
            };

            if !Segment::is_valid(&buf[..n]) || self.fault.should_corrupt(Direction::Ack) {
                continue;
            }
            let Some(seg) = Segment::decode(&buf[..n]) else { continue };

            // Final leg of the handshake: any segment here (retransmitted
            // SYN or data) acknowledges the connection is synchronized.
            if seg.flags.syn && !seg.flags.ack {
                // Duplicate client SYN — treated as a re-ack, send SYN+ACK again.
                continue;
            }

            self.state = State::Established;
            info!("accept: established with client_isn={}", self.client_isn);
            return Ok(());
        }
    }

    /// Blocks until every byte of `data` is cumulatively acknowledged, or
    /// the connection is declared lost (spec §4.3).
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state != State::Established {
            return Err(Error::NotEstablished);
        }

        let sender_cfg = SenderConfig {
            mss: self.cfg.mss,
            client_isn: self.client_isn,
            server_isn: self.server_isn,
            src_port: self.src_port(),
            dst_port: self.dst_port(),
            max_retransmits: self.cfg.max_retransmits,
        };

        sender::send(&self.socket, data, &sender_cfg, &self.advertised_window, &self.fault)
    }

    /// Returns the full reassembled byte stream after the peer closes
    /// (spec §4.4). One-shot: the entire stream, not per-segment.
    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        if self.state != State::Established {
            return Err(Error::NotEstablished);
        }

        let receiver_cfg = ReceiverConfig {
            src_port: self.src_port(),
            dst_port: self.dst_port(),
            client_isn: self.client_isn,
            server_isn: self.server_isn,
        };

        self.advertised_window.store(self.cfg.recv_window, Ordering::Release);
        let out = receiver::recv(&self.socket, &receiver_cfg, &self.advertised_window, &self.fault)?;
        self.state = State::CloseWait;
        Ok(out)
    }

    /// Four-way teardown (spec §4.2). `base`/`seq_no_offset` are whatever
    /// byte offset the sender last reached — callers close after `send`
    /// completes, so this always tears down from the fully-acked offset.
    pub fn close(&mut self, sent_offset: u64) -> Result<(), Error> {
        self.state = State::FinWait;

        let fin = Segment {
            src_port: self.src_port(),
            dst_port: self.dst_port(),
            seq_no: (sent_offset.wrapping_add(self.client_isn as u64)) as u32,
            ack_no: (sent_offset.wrapping_add(self.server_isn as u64)) as u32,
            flags: Flags { fin: true, ..Flags::default() },
            rcv_window: self.cfg.recv_window,
            payload: Vec::new(),
        };

        self.socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        let mut buf = vec![0u8; 1500];

        loop {
            if !self.fault.should_drop(Direction::Data) {
                self.socket.send(&fin.encode())?;
            }

            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => continue,
            };

            if !Segment::is_valid(&buf[..n]) || self.fault.should_corrupt(Direction::Ack) {
                continue;
            }
            let Some(seg) = Segment::decode(&buf[..n]) else { continue };

            if seg.flags.fin && seg.flags.ack {
                let base = (seg.ack_no.wrapping_sub(self.server_isn)) as u64;
                let final_ack = Segment {
                    seq_no: (base.wrapping_add(self.client_isn as u64)) as u32,
                    ack_no: (base.wrapping_add(self.server_isn as u64)) as u32,
                    flags: Flags { fin: true, ack: true, ..Flags::default() },
                    ..fin.clone()
                };
                self.socket.send(&final_ack.encode())?;
                self.state = State::Closed;
                info!("close: teardown complete");
                return Ok(());
            }
        }
    }
}

/// RFC1323-style modular comparison for 32-bit sequence-space wraparound
/// (spec §9: "implementation should perform modular comparison").
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_lt_handles_wraparound() {
        assert!(wrapping_lt(0xFFFF_FFF0, 5));
        assert!(!wrapping_lt(5, 0xFFFF_FFF0));
    }
}
