use qnet::SocketId;

#[derive(Debug, Clone)]
pub enum HostEvent {
    ClientConnected {
        id: SocketId,
        address: String,
    },
    ClientDisconnected {
        id: SocketId,
        address: String,
        reason: DisconnectReason,
    },
    ServerDisconnected {
        address: String,
        reason: DisconnectReason,
    },
    Chat {
        from: String,
        text: String,
    },
    ServerPrint {
        text: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    /// Timed out or closed by the transport.
    Dropped,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Dropped => "dropped",
        }
    }
}
