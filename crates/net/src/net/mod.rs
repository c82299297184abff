mod control;
mod datagram;
mod discovery;
mod driver;
mod hostcache;
mod poll;
mod probe;
mod protocol;
mod simulator;
mod socket;
mod stack;
mod status;
mod udp;
mod vcr;

pub use control::{ControlMessage, PlayerInfoReply, ServerInfoReply};
#[cfg(feature = "ban")]
pub use datagram::{BanFilter, REJECT_BANNED};
pub use datagram::{
    CONNECT_ATTEMPT_TIMEOUT, CONNECT_ATTEMPTS, DUPLICATE_CONNECT_WINDOW, DatagramDriver,
    REJECT_FULL, REJECT_VERSION, RESEND_INTERVAL,
};
pub use driver::{NetContext, NetDriver, Received, SendResult};
pub use hostcache::{HOST_NAME_LEN, HostCache, HostCacheEntry};
pub use poll::PollScheduler;
pub use probe::{PLAYER_PROBE_INTERVAL, PLAYER_PROBE_POLLS, ProbeKind, ProbeReport, RULE_PROBE_INTERVAL};
pub use protocol::{
    CONTROL_HEADER_SIZE, ControlCode, DEFAULT_PORT, GAME_NAME, HOST_CACHE_SIZE, LENGTH_MASK,
    MAX_DATAGRAM, MAX_SCOREBOARD, NET_DATAGRAMSIZE, NET_HEADERSIZE, NET_MAXMESSAGE, NET_NAMELEN,
    NET_PROTOCOL_VERSION, PacketFlags, PacketHeader, control_word, is_valid_control, packet,
};
pub use simulator::{SimNetwork, SimSocket, SimWire, WireRecord};
pub use socket::{QSocket, SocketId, SocketPool, SocketStats, UNSET_ADDRESS};
pub use stack::{LOCAL_HOST, NetStack, PollTask, SLIST_DURATION};
pub use status::{PlayerRecord, ServerStatus};
pub use udp::{
    AddrMatch, Datagram, Network, SystemNetwork, UdpHandle, UdpTransport, addr_compare,
    addr_to_string, partial_ip_address,
};
pub use vcr::{VcrDriver, VcrRecord, VcrRecorder, read_records};
