pub mod config;
pub mod error;
pub mod msg;
pub mod net;
pub mod sizebuf;
pub mod stats;
pub mod time;

pub use config::{DEFAULT_MESSAGE_TIMEOUT, NetConfig};
pub use error::{ConnectError, NetError};
pub use msg::{MAX_MSG_STRING, MsgReader};
pub use net::{
    ControlMessage, DEFAULT_PORT, DatagramDriver, HostCache, HostCacheEntry, MAX_DATAGRAM,
    NET_MAXMESSAGE, NetDriver, NetStack, PlayerRecord, ProbeKind, ProbeReport, Received,
    SendResult, ServerStatus, SimWire, SocketId, VcrRecord,
};
pub use sizebuf::{SizeBuf, SizeBufError};
pub use stats::{NetStats, PacketLossSimulation, TransportStats};
pub use time::{Clock, ManualClock, SystemClock};
