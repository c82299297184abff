use std::io;

use crate::sizebuf::SizeBufError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("network i/o: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    SizeBuf(#[from] SizeBufError),
    #[error("UDP_Init: unable to determine a non-loopback local address")]
    NoLocalAddress,
    #[error("UDP_Init: unable to open control socket: {0}")]
    ControlSocket(io::Error),
    #[error("UDP_Listen: unable to open accept socket on port {port}: {source}")]
    AcceptSocket { port: u16, source: io::Error },
    #[error("attempted to use multiple broadcast sockets")]
    BroadcastInUse,
    #[error("zero length message")]
    ZeroLengthMessage,
    #[error("message too big: {size} (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("called with canSend == false")]
    ChannelBusy,
    #[error("bad value, must be between 1 and 65534: {0}")]
    InvalidPort(i64),
    #[error("maxplayers can not be changed while a server is running")]
    ServerActive,
    #[error("VCR mismatch: expected {expected}")]
    VcrMismatch { expected: &'static str },
    #[error("VCR record: {0}")]
    VcrRecord(String),
}

/// Why a client connection attempt produced no socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("UDP transport is not initialized")]
    NotInitialized,
    #[error("Could not resolve {0}")]
    UnknownHost(String),
    #[error("No free sockets")]
    NoFreeSocket,
    #[error("Could not open socket: {0}")]
    Socket(io::Error),
    #[error("No Response")]
    NoResponse,
    #[error("{0}")]
    Rejected(String),
    #[error("Bad Response")]
    BadResponse,
    #[error("Network Error")]
    NetworkError(io::Error),
    #[error("No Quake servers found")]
    NoServers,
    #[error(transparent)]
    Fatal(#[from] NetError),
}
