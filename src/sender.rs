//! Sender: window scan, segment transmit, retransmission timers,
//! congestion-window growth, and RTT estimation (spec §4.3).
//!
//! Two cooperating threads: the send loop (owns `base`/`seq_no`/`cwnd`/the
//! pending-ack table outright) and the ACK reader (owns the socket's read
//! half and forwards decoded ACKs over a channel — spec §9's redesign note
//! to prefer message passing over shared locked state).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::connection::wrapping_lt;
use crate::err::Error;
use crate::fault::{Direction, FaultInjector};
use crate::segment::{Flags, Segment};
use crate::timer::PendingAckTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
}

struct AckEvent {
    ack_no: u32,
    rcv_window: u16,
}

pub struct SenderConfig {
    pub mss: usize,
    pub client_isn: u32,
    pub server_isn: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub max_retransmits: u32,
}

/// Runs `send(data)` to completion: spawns the ACK-reader, drives the
/// window-scan loop on the calling thread, and returns once every byte is
/// cumulatively acknowledged or the connection is declared lost.
pub fn send(
    socket: &UdpSocket,
    data: &[u8],
    cfg: &SenderConfig,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
) -> Result<(), Error> {
    let (tx, rx) = mpsc::channel::<AckEvent>();
    let done = Arc::new(AtomicBool::new(false));

    let ack_socket = socket.try_clone()?;
    let ack_done = done.clone();
    let ack_fault = fault.clone();
    let ack_thread = std::thread::spawn(move || ack_reader(ack_socket, tx, ack_done, ack_fault));

    let result = send_loop(socket, data, cfg, advertised_window, fault, &rx);

    done.store(true, Ordering::Release);
    let _ = ack_thread.join();

    result
}

fn send_loop(
    socket: &UdpSocket,
    data: &[u8],
    cfg: &SenderConfig,
    advertised_window: &Arc<AtomicU16>,
    fault: &FaultInjector,
    acks: &mpsc::Receiver<AckEvent>,
) -> Result<(), Error> {
    let mut base: u64 = 0;
    let mut seq_no: u64 = 0;
    let mut cwnd: u64 = cfg.mss as u64;
    let mut cwnd_factor: f64 = 1.0;
    let mut ssthresh: Option<f64> = None;
    let mut phase = Phase::SlowStart;

    let mut estimated_rtt = 0.0f64;
    let mut dev_rtt = 0.0f64;
    let mut timeout = Duration::from_secs(1);

    let mut peer_recv_window: u64 = u16::MAX as u64;
    let mut last_ack_no: Option<u32> = None;
    let mut dup_count = 0u32;
    let mut consecutive_timeouts = 0u32;

    let mut timers = PendingAckTable::new();

    loop {
        // Drain every ACK event that has arrived since the last pass.
        while let Ok(ev) = acks.try_recv() {
            peer_recv_window = ev.rcv_window as u64;

            if last_ack_no == Some(ev.ack_no) {
                dup_count += 1;
                // cwnd grows on every duplicate ACK, not only at the triple-dup
                // fast-retransmit event (spec §9: "the specification follows the
                // source here").
                bump_cwnd_on_dup(phase, &mut cwnd_factor, cfg.mss, cwnd);

                if let Some(st) = ssthresh {
                    if phase == Phase::SlowStart && cwnd_factor * cwnd as f64 >= st {
                        phase = Phase::CongestionAvoidance;
                    }
                }

                if dup_count == 3 {
                    debug!("fast retransmit: 3 duplicate ACKs for ack_no={}", ev.ack_no);
                    cwnd_factor /= 2.0;
                    seq_no = base;
                    timers.cancel_from(base);
                }
                continue;
            }

            last_ack_no = Some(ev.ack_no);
            dup_count = 0;

            // Modular comparison (spec §9: "(a-b) mod 2^32 < 2^31") rather
            // than a plain integer compare: a stray or reordered ack whose
            // wire value sits behind the current cumulative ack must not be
            // allowed to wrap `new_base` past `data.len()`.
            let expected_ack = (base.wrapping_add(cfg.server_isn as u64)) as u32;
            let advances = ev.ack_no != expected_ack && wrapping_lt(expected_ack, ev.ack_no);
            let new_base = (ev.ack_no.wrapping_sub(cfg.server_isn)) as u64;

            if advances {
                if let Some(send_time) = first_acked_send_time(&timers, base, new_base) {
                    let sample = send_time.elapsed().as_secs_f64();
                    estimated_rtt = 0.875 * estimated_rtt + 0.125 * sample;
                    dev_rtt = 0.75 * dev_rtt + 0.25 * (sample - estimated_rtt).abs();
                    timeout = Duration::from_secs_f64((estimated_rtt + 4.0 * dev_rtt).max(0.001));
                    trace!("rtt sample={:.4}s -> timeout={:.4}s", sample, timeout.as_secs_f64());
                }
                timers.cancel_before(new_base);

                if phase == Phase::SlowStart {
                    cwnd_factor += (new_base - base) as f64 / cwnd as f64;
                } else {
                    cwnd_factor += cfg.mss as f64 / (cwnd_factor * cwnd as f64);
                }

                if let Some(st) = ssthresh {
                    if cwnd_factor * cwnd as f64 >= st {
                        phase = Phase::CongestionAvoidance;
                    }
                }

                base = new_base;
                consecutive_timeouts = 0;
            }
        }

        // Timeout handling: the earliest unacked segment's deadline fired.
        if let Some(_expired_seq) = timers.poll_expired() {
            consecutive_timeouts += 1;
            if consecutive_timeouts > cfg.max_retransmits {
                timers.clear();
                return Err(Error::ConnectionLost(consecutive_timeouts));
            }

            warn!(
                "retransmission timeout at base={} (attempt {}/{})",
                base, consecutive_timeouts, cfg.max_retransmits
            );

            ssthresh = Some((cwnd_factor * cwnd as f64) / 2.0);
            cwnd_factor = 1.0;
            phase = Phase::SlowStart;
            seq_no = base;
            timers.cancel_from(base);
        }

        let window_end = (base + (cwnd_factor * cwnd as f64) as u64)
            .min(base + peer_recv_window)
            .min(data.len() as u64);

        while seq_no < window_end {
            let len = (cfg.mss as u64).min(data.len() as u64 - seq_no) as usize;
            let chunk = &data[seq_no as usize..seq_no as usize + len];

            let seg = Segment {
                src_port: cfg.src_port,
                dst_port: cfg.dst_port,
                seq_no: (seq_no.wrapping_add(cfg.client_isn as u64)) as u32,
                ack_no: (base.wrapping_add(cfg.server_isn as u64)) as u32,
                flags: Flags::default(),
                rcv_window: advertised_window.load(Ordering::Acquire),
                payload: chunk.to_vec(),
            };

            if !fault.should_drop(Direction::Data) {
                socket.send(&seg.encode())?;
            }

            timers.arm(seq_no, timeout);
            seq_no += len as u64;
        }

        if base >= data.len() as u64 {
            // Every byte acked means every pending-ack timer has been
            // cancelled already; `clear` is the deterministic release spec
            // §5 asks for on top of that, rather than relying solely on
            // `timers` going out of scope.
            debug!("send complete, pending timers empty: {}", timers.is_empty());
            timers.clear();
            return Ok(());
        }

        std::thread::sleep(Duration::from_millis(2));
    }
}

fn bump_cwnd_on_dup(phase: Phase, cwnd_factor: &mut f64, mss: usize, cwnd: u64) {
    if phase == Phase::SlowStart {
        *cwnd_factor += 1.0;
    } else {
        *cwnd_factor += mss as f64 / (*cwnd_factor * cwnd as f64);
    }
}

/// Finds the send time of the earliest still-pending segment that the new
/// cumulative ack covers, for the RTT sample (mirrors taking the sample
/// from the oldest entry being acknowledged).
fn first_acked_send_time(timers: &PendingAckTable, base: u64, new_base: u64) -> Option<Instant> {
    if new_base <= base {
        return None;
    }
    timers.send_time(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_duplicate_ack_bumps_cwnd_factor_by_one() {
        let mut cwnd_factor = 1.0;
        bump_cwnd_on_dup(Phase::SlowStart, &mut cwnd_factor, 5000, 5000);
        assert_eq!(cwnd_factor, 2.0);
    }

    #[test]
    fn congestion_avoidance_duplicate_ack_bumps_cwnd_factor_fractionally() {
        let mut cwnd_factor = 2.0;
        let mss = 5000u64;
        bump_cwnd_on_dup(Phase::CongestionAvoidance, &mut cwnd_factor, mss as usize, mss);
        // mss / (cwnd_factor * cwnd) == 5000 / (2.0 * 5000) == 0.5
        assert!((cwnd_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn first_acked_send_time_returns_none_when_base_does_not_advance() {
        let timers = PendingAckTable::new();
        assert!(first_acked_send_time(&timers, 100, 100).is_none());
    }

    #[test]
    fn first_acked_send_time_reads_old_base_send_time() {
        let mut timers = PendingAckTable::new();
        timers.arm(0, Duration::from_secs(5));
        assert!(first_acked_send_time(&timers, 0, 5000).is_some());
    }
}

fn ack_reader(
    socket: UdpSocket,
    tx: mpsc::Sender<AckEvent>,
    done: Arc<AtomicBool>,
    fault: FaultInjector,
) {
    socket.set_read_timeout(Some(Duration::from_secs(1))).ok();
    let mut buf = vec![0u8; 65536];

    while !done.load(Ordering::Acquire) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(_) => continue,
        };

        if !Segment::is_valid(&buf[..n]) || fault.should_corrupt(Direction::Ack) {
            continue;
        }

        let Some(seg) = Segment::decode(&buf[..n]) else { continue };

        // Only pure data-phase ACKs advance the sender; a resent SYN+ACK
        // (the server re-acking a duplicate third-leg SYN, connection.rs's
        // accept()) also carries ACK=1 and must not be mistaken for one.
        if !seg.flags.ack || seg.flags.syn {
            continue;
        }

        if tx
            .send(AckEvent {
                ack_no: seg.ack_no,
                rcv_window: seg.rcv_window,
            })
            .is_err()
        {
            return;
        }
    }
}
