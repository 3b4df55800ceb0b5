//! A teaching-grade reliable stream transport layered over UDP: three-way
//! handshake, cumulative ACK, sliding-window flow control, slow-start /
//! congestion-avoidance / fast-retransmit congestion control, adaptive
//! RTT-based timeouts, graceful teardown, and injectable faults.

mod connection;
mod err;
mod fault;
mod receiver;
mod segment;
mod sender;
mod timer;

pub use connection::{Config, Connection, State};
pub use err::Error;
pub use fault::DebugOption;
pub use segment::{Flags, Segment};
