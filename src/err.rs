#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection declared lost after {0} consecutive retransmission timeouts")]
    ConnectionLost(u32),

    #[error("connect() called on a connection that is not Closed")]
    AlreadyConnected,

    #[error("send()/recv() called before the connection reached Established")]
    NotEstablished,
}
