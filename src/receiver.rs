//! Receiver: incoming-segment demultiplex, in-order delivery with
//! cumulative ACK, advertised receive-window accounting (spec §4.4).
//!
//! The receive thread only decodes and classifies segments; it forwards
//! validated ones to the processor over a channel instead of a
//! lock-guarded queue (spec §9's message-passing redesign note), and the
//! processor blocks on the channel instead of idle-spinning.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::fault::{Direction, FaultInjector};
use crate::segment::{Flags, Segment};

pub struct ReceiverConfig {
    pub src_port: u16,
    pub dst_port: u16,
    pub client_isn: u32,
    pub server_isn: u32,
}

/// Runs `recv()` to completion: spawns the segment-receive thread, drains
/// validated segments on the calling thread in order, and returns the full
/// reassembled byte stream once a FIN has closed out the stream.
pub fn recv(
    socket: &UdpSocket,
    cfg: &ReceiverConfig,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
) -> std::io::Result<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Segment>();
    let done = Arc::new(AtomicBool::new(false));

    let recv_socket = socket.try_clone()?;
    let recv_fault = fault.clone();
    let window = advertised_window.clone();
    let recv_done = done.clone();
    let recv_thread =
        std::thread::spawn(move || receive_task(recv_socket, tx, window, recv_fault, recv_done));

    let out = processor(socket, cfg, advertised_window, fault, &rx);

    done.store(true, Ordering::Release);
    let _ = recv_thread.join();
    Ok(out)
}

fn receive_task(
    socket: UdpSocket,
    tx: mpsc::Sender<Segment>,
    advertised_window: Arc<AtomicU16>,
    fault: FaultInjector,
    done: Arc<AtomicBool>,
) {
    socket.set_read_timeout(Some(Duration::from_secs(1))).ok();
    let mut buf = vec![0u8; 65536];

    while !done.load(Ordering::Acquire) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(_) => continue,
        };

        if !Segment::is_valid(&buf[..n]) || fault.should_corrupt(Direction::Data) {
            continue;
        }

        let Some(seg) = Segment::decode(&buf[..n]) else { continue };

        if seg.flags.fin {
            trace!("FIN received, seq_no={}", seg.seq_no);
            let is_final = seg.flags.ack;
            if tx.send(seg).is_err() || is_final {
                return;
            }
            continue;
        }

        // Floor the advertised window at 1 (never advertise a fully
        // closed window, which would stall the peer indefinitely).
        let shrink = n as u16;
        advertised_window.fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some(w.saturating_sub(shrink).max(1))
        }).ok();

        if tx.send(seg).is_err() {
            return;
        }
    }
}

fn processor(
    socket: &UdpSocket,
    cfg: &ReceiverConfig,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
    segments: &mpsc::Receiver<Segment>,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut base: u64 = 0;
    let mut last_seq_no: u32 = 0;

    loop {
        let seg = match segments.recv_timeout(Duration::from_secs(2)) {
            Ok(seg) => seg,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let grown = (crate::segment::HEADER_LEN + seg.payload.len()) as u32;
        advertised_window.fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
            Some(w.saturating_add(grown as u16).min(u16::MAX))
        }).ok();

        // Re-verify at dequeue time: the fault injector can still gate this
        // segment as corrupted even though it already passed the receive
        // thread's check, modelling corruption introduced after buffering.
        if fault.should_corrupt(Direction::Data) {
            continue;
        }

        last_seq_no = seg.seq_no;

        let stream_offset = (seg.seq_no.wrapping_sub(cfg.client_isn)) as u64;

        if seg.flags.fin {
            if stream_offset != base {
                // Not yet caught up to this FIN's offset; re-ACK the
                // current base and keep waiting for the missing bytes.
                send_ack(socket, cfg, base, last_seq_no, advertised_window, fault);
                continue;
            }
            send_fin_ack(socket, cfg, base, last_seq_no, advertised_window, fault);
            // Half-close tolerance: await the peer's final ACK+FIN with a
            // short timeout, but close locally either way.
            match segments.recv_timeout(Duration::from_secs(1)) {
                Ok(final_seg) if final_seg.flags.fin && final_seg.flags.ack => {
                    debug!("received final ACK+FIN, teardown complete");
                }
                _ => {
                    debug!("half-close timeout, closing locally");
                }
            }
            debug!("receive complete, {} bytes delivered", out.len());
            break;
        }

        if stream_offset == base {
            out.extend_from_slice(&seg.payload);
            base += if seg.payload.is_empty() { 1 } else { seg.payload.len() as u64 };
        }
        // Out-of-order segments are silently re-ACKed at the existing
        // base: the sender reads this as a duplicate ACK and drives its
        // own fast-retransmit path.

        send_ack(socket, cfg, base, last_seq_no, advertised_window, fault);
    }

    out
}

fn send_ack(
    socket: &UdpSocket,
    cfg: &ReceiverConfig,
    base: u64,
    last_seq_no: u32,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
) {
    let seg = Segment {
        src_port: cfg.src_port,
        dst_port: cfg.dst_port,
        seq_no: last_seq_no,
        ack_no: (base.wrapping_add(cfg.server_isn as u64)) as u32,
        flags: Flags::ack(),
        rcv_window: advertised_window.load(Ordering::Acquire),
        payload: Vec::new(),
    };

    if !fault.should_drop(Direction::Ack) {
        let _ = socket.send(&seg.encode());
    }
}

fn send_fin_ack(
    socket: &UdpSocket,
    cfg: &ReceiverConfig,
    base: u64,
    last_seq_no: u32,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
) {
    let seg = Segment {
        src_port: cfg.src_port,
        dst_port: cfg.dst_port,
        seq_no: last_seq_no,
        ack_no: (base.wrapping_add(cfg.server_isn as u64)) as u32,
        flags: Flags::fin_ack(),
        rcv_window: advertised_window.load(Ordering::Acquire),
        payload: Vec::new(),
    };

    if !fault.should_drop(Direction::Ack) {
        let _ = socket.send(&seg.encode());
    }
}
