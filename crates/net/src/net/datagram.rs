use std::io;
use std::net::SocketAddr;
#[cfg(feature = "ban")]
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{ConnectError, NetError};
use crate::sizebuf::SizeBuf;
use crate::stats::TransportStats;

use super::control::{ControlMessage, PlayerInfoReply, ServerInfoReply};
use super::driver::{NetContext, NetDriver, Received, SendResult};
use super::hostcache::{HOST_NAME_LEN, truncate};
use super::probe::{ProbeKind, ProbeReport, ProbeState};
use super::protocol::{
    GAME_NAME, MAX_DATAGRAM, NET_DATAGRAMSIZE, NET_HEADERSIZE, NET_MAXMESSAGE,
    NET_PROTOCOL_VERSION, PacketFlags, PacketHeader, is_valid_control, packet,
};
use super::socket::{QSocket, SocketId};
use super::udp::{AddrMatch, Network, SystemNetwork, UdpHandle, UdpTransport, addr_compare, addr_to_string};

pub const RESEND_INTERVAL: f64 = 1.0;
pub const CONNECT_ATTEMPTS: usize = 3;
pub const CONNECT_ATTEMPT_TIMEOUT: f64 = 2.5;
pub const DUPLICATE_CONNECT_WINDOW: f64 = 2.0;

pub const REJECT_FULL: &str = "Server is full.\n";
pub const REJECT_VERSION: &str = "Incompatible version.\n";
#[cfg(feature = "ban")]
pub const REJECT_BANNED: &str = "You have been banned.\n";

/// Connections from addresses matching `addr` under `mask` are refused.
#[cfg(feature = "ban")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanFilter {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

#[cfg(feature = "ban")]
impl BanFilter {
    pub fn new(addr: Ipv4Addr, mask: Option<Ipv4Addr>) -> Self {
        Self {
            addr,
            mask: mask.unwrap_or(Ipv4Addr::BROADCAST),
        }
    }

    /// Parses `address [mask]` as typed at the console.
    pub fn parse(addr: &str, mask: Option<&str>) -> Option<Self> {
        let addr = addr.parse().ok()?;
        let mask = match mask {
            Some(mask) => Some(mask.parse().ok()?),
            None => None,
        };
        Some(Self::new(addr, mask))
    }

    pub fn describe(&self) -> String {
        format!("Banning {} [{}]", self.addr, self.mask)
    }

    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match addr.ip() {
            IpAddr::V4(ip) => u32::from(ip) & u32::from(self.mask) == u32::from(self.addr),
            IpAddr::V6(_) => false,
        }
    }
}

/// Reliable and unreliable messaging over UDP: a stop-and-wait ARQ with one
/// outstanding fragment per connection.
pub struct DatagramDriver {
    network: Option<Box<dyn Network>>,
    pub(crate) udp: Option<UdpTransport>,
    pub(crate) level: usize,
    stats: TransportStats,
    pub(crate) players_probe: ProbeState,
    pub(crate) rules_probe: ProbeState,
    #[cfg(feature = "ban")]
    ban: Option<BanFilter>,
}

impl DatagramDriver {
    pub fn new(network: Box<dyn Network>) -> Self {
        Self {
            network: Some(network),
            udp: None,
            level: 0,
            stats: TransportStats::default(),
            players_probe: ProbeState::default(),
            rules_probe: ProbeState::default(),
            #[cfg(feature = "ban")]
            ban: None,
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemNetwork))
    }

    pub fn udp(&self) -> Option<&UdpTransport> {
        self.udp.as_ref()
    }
}

/// Sends a control frame; delivery failures are not reported.
pub(crate) fn send_control(
    udp: &UdpTransport,
    handle: UdpHandle,
    to: SocketAddr,
    message: &ControlMessage,
) -> Result<(), NetError> {
    let mut buf = SizeBuf::alloc(NET_DATAGRAMSIZE);
    message.encode(&mut buf)?;
    if let Err(e) = udp.write(handle, buf.data(), to) {
        log::debug!("control write to {} failed: {}", to, e);
    }
    Ok(())
}

fn write_fragment(udp: &UdpTransport, sock: &QSocket, sequence: u32) -> io::Result<()> {
    let handle = sock
        .transport
        .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
    let (len, flags) = if sock.send_message.len() <= MAX_DATAGRAM {
        (sock.send_message.len(), PacketFlags::DATA | PacketFlags::EOM)
    } else {
        (MAX_DATAGRAM, PacketFlags::DATA)
    };
    udp.write(handle, &packet(flags, sequence, &sock.send_message[..len]), sock.addr)?;
    Ok(())
}

fn send_message_next(
    udp: &UdpTransport,
    stats: &mut TransportStats,
    sock: &mut QSocket,
    now: f64,
) -> io::Result<()> {
    sock.send_next = false;
    let sequence = sock.send_sequence;
    sock.send_sequence = sequence.wrapping_add(1);
    write_fragment(udp, sock, sequence)?;
    sock.last_send_time = now;
    stats.packets_sent += 1;
    Ok(())
}

fn resend_message(
    udp: &UdpTransport,
    stats: &mut TransportStats,
    sock: &mut QSocket,
    now: f64,
) -> io::Result<()> {
    sock.send_next = false;
    write_fragment(udp, sock, sock.send_sequence.wrapping_sub(1))?;
    sock.last_send_time = now;
    stats.packets_resent += 1;
    Ok(())
}

/// Sends the connect request up to three times and waits for a control
/// reply from the server address.
fn handshake(
    udp: &UdpTransport,
    ctx: &mut NetContext,
    handle: UdpHandle,
    send_addr: SocketAddr,
) -> Result<ControlMessage, ConnectError> {
    let mut request = SizeBuf::alloc(NET_DATAGRAMSIZE);
    ControlMessage::Connect {
        game: GAME_NAME.to_string(),
        version: NET_PROTOCOL_VERSION,
    }
    .encode(&mut request)
    .map_err(NetError::from)?;

    let mut reply = vec![0u8; NET_MAXMESSAGE];
    let mut start = ctx.set_net_time();
    log::info!("trying...");

    for _ in 0..CONNECT_ATTEMPTS {
        if let Err(e) = udp.write(handle, request.data(), send_addr) {
            log::debug!("connect request to {} failed: {}", send_addr, e);
        }

        loop {
            match udp.read(handle, &mut reply) {
                Err(e) => return Err(ConnectError::NetworkError(e)),
                Ok(Some((len, from))) => {
                    if addr_compare(&from, &send_addr) != AddrMatch::Same {
                        log::debug!("wrong reply address {} (expected {})", from, send_addr);
                    } else if is_valid_control(&reply[..len]) {
                        return ControlMessage::decode(&reply[..len])
                            .ok_or(ConnectError::BadResponse);
                    }
                }
                Ok(None) => {}
            }
            if ctx.set_net_time() - start >= CONNECT_ATTEMPT_TIMEOUT {
                break;
            }
            ctx.clock.idle();
        }

        log::info!("still trying...");
        start = ctx.set_net_time();
    }

    Err(ConnectError::NoResponse)
}

impl NetDriver for DatagramDriver {
    fn name(&self) -> &'static str {
        "Datagram"
    }

    fn init(&mut self, ctx: &mut NetContext, level: usize) -> Result<bool, NetError> {
        self.level = level;
        if ctx.config.no_lan {
            return Ok(false);
        }
        let Some(network) = self.network.take() else {
            return Ok(self.udp.is_some());
        };

        let udp = UdpTransport::init(
            network,
            ctx.config.host_port,
            ctx.config.local_ip,
            ctx.config.packet_loss.clone(),
        )?;
        if ctx.server.host_name == "UNNAMED" {
            if let Ok(name) = std::env::var("HOSTNAME") {
                ctx.server.host_name = truncate(&name, HOST_NAME_LEN);
            }
        }
        self.udp = Some(udp);
        Ok(true)
    }

    fn listen(&mut self, _ctx: &mut NetContext, state: bool) -> Result<(), NetError> {
        match self.udp.as_mut() {
            Some(udp) => udp.listen(state),
            None => Ok(()),
        }
    }

    fn set_host_port(&mut self, port: u16) {
        if let Some(udp) = self.udp.as_mut() {
            udp.set_host_port(port);
        }
    }

    fn search_for_hosts(&mut self, ctx: &mut NetContext, xmit: bool) -> Result<(), NetError> {
        self.search(ctx, xmit)
    }

    fn connect(&mut self, ctx: &mut NetContext, host: &str) -> Result<SocketId, ConnectError> {
        let udp = self.udp.as_mut().ok_or(ConnectError::NotInitialized)?;
        let send_addr = udp
            .addr_from_name(host)
            .ok_or_else(|| ConnectError::UnknownHost(host.to_string()))?;

        let handle = udp.open_socket(0).map_err(ConnectError::Socket)?;
        let Some(id) = ctx.pool.new_socket(self.level, ctx.time) else {
            udp.close_socket(handle);
            return Err(ConnectError::NoFreeSocket);
        };
        if let Some(sock) = ctx.pool.get_mut(id) {
            sock.transport = Some(handle);
        }

        let result = match handshake(udp, ctx, handle, send_addr) {
            Ok(ControlMessage::Accept { port }) => {
                let address = udp.name_from_addr(&send_addr);
                let now = ctx.set_net_time();
                if let Some(sock) = ctx.pool.get_mut(id) {
                    sock.addr = send_addr;
                    sock.addr.set_port(port as u16);
                    sock.address = address;
                    sock.last_message_time = now;
                }
                log::info!("Connection accepted");
                return Ok(id);
            }
            Ok(ControlMessage::Reject { reason }) => ConnectError::Rejected(reason),
            Ok(_) => ConnectError::BadResponse,
            Err(e) => e,
        };

        log::info!("{}", result.to_string().trim_end());
        udp.close_socket(handle);
        ctx.pool.free_socket(id);
        Err(result)
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut NetContext,
    ) -> Result<Option<SocketId>, NetError> {
        let Some(udp) = self.udp.as_mut() else {
            return Ok(None);
        };
        let Some(accept) = udp.accept_socket() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; NET_MAXMESSAGE];
        let (len, from) = match udp.read(accept, &mut buf) {
            Ok(Some(received)) => received,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::warn!("accept socket read failed: {}", e);
                return Ok(None);
            }
        };
        let Some(request) = ControlMessage::decode(&buf[..len]) else {
            return Ok(None);
        };

        match request {
            ControlMessage::ServerInfo { game, .. } => {
                if game != GAME_NAME {
                    return Ok(None);
                }
                let reply = ControlMessage::ServerInfoReply(ServerInfoReply {
                    address: String::new(),
                    host_name: ctx.server.host_name.clone(),
                    level_name: ctx.server.level_name.clone(),
                    current_players: ctx.server.players.len() as u8,
                    max_players: ctx.pool.max_clients() as u8,
                    protocol_version: NET_PROTOCOL_VERSION,
                });
                send_control(udp, accept, from, &reply)?;
                Ok(None)
            }
            ControlMessage::PlayerInfo { player } => {
                let Some(client) = ctx.server.players.get(player as usize) else {
                    return Ok(None);
                };
                let sock = client.socket.and_then(|id| ctx.pool.get(id));
                let reply = ControlMessage::PlayerInfoReply(PlayerInfoReply {
                    player,
                    name: client.name.clone(),
                    colors: client.colors,
                    frags: client.frags,
                    connect_time: sock.map_or(0, |s| (ctx.time - s.connect_time) as i32),
                    address: sock.map_or_else(String::new, |s| s.address.clone()),
                });
                send_control(udp, accept, from, &reply)?;
                Ok(None)
            }
            ControlMessage::RuleInfo { previous } => {
                let rule = ctx.server.next_rule(&previous).cloned();
                send_control(udp, accept, from, &ControlMessage::RuleInfoReply { rule })?;
                Ok(None)
            }
            ControlMessage::Connect { game, version } => {
                if game != GAME_NAME {
                    return Ok(None);
                }
                if version != NET_PROTOCOL_VERSION {
                    let reject = ControlMessage::Reject {
                        reason: REJECT_VERSION.to_string(),
                    };
                    send_control(udp, accept, from, &reject)?;
                    return Ok(None);
                }
                #[cfg(feature = "ban")]
                if self.ban.is_some_and(|ban| ban.matches(&from)) {
                    let reject = ControlMessage::Reject {
                        reason: REJECT_BANNED.to_string(),
                    };
                    send_control(udp, accept, from, &reject)?;
                    return Ok(None);
                }

                let existing = ctx.pool.active().find_map(|(id, s)| {
                    (s.driver == self.level && addr_compare(&from, &s.addr) == AddrMatch::Same)
                        .then_some((id, s.connect_time, s.transport))
                });
                if let Some((id, connect_time, transport)) = existing {
                    if ctx.time - connect_time < DUPLICATE_CONNECT_WINDOW {
                        if let Some(handle) = transport {
                            let port = udp.socket_addr(handle)?.port();
                            let accept_reply = ControlMessage::Accept { port: port as i32 };
                            send_control(udp, accept, from, &accept_reply)?;
                        }
                        return Ok(None);
                    }
                    log::debug!("closing stale connection from {}", from);
                    if let Some(handle) = transport {
                        udp.close_socket(handle);
                    }
                    ctx.pool.free_socket(id);
                    return Ok(None);
                }

                let Some(id) = ctx.pool.new_socket(self.level, ctx.time) else {
                    let reject = ControlMessage::Reject {
                        reason: REJECT_FULL.to_string(),
                    };
                    send_control(udp, accept, from, &reject)?;
                    return Ok(None);
                };
                let handle = match udp.open_socket(0) {
                    Ok(handle) => handle,
                    Err(e) => {
                        log::warn!("unable to open connection socket: {}", e);
                        ctx.pool.free_socket(id);
                        return Ok(None);
                    }
                };
                if let Some(sock) = ctx.pool.get_mut(id) {
                    sock.transport = Some(handle);
                    sock.addr = from;
                    sock.address = addr_to_string(&from);
                }
                let port = udp.socket_addr(handle)?.port();
                send_control(udp, accept, from, &ControlMessage::Accept { port: port as i32 })?;
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    fn get_message(&mut self, ctx: &mut NetContext, id: SocketId) -> Result<Received, NetError> {
        let Some(udp) = self.udp.as_ref() else {
            return Ok(Received::Disconnected);
        };
        let now = ctx.time;
        let Some(sock) = ctx.pool.get_mut(id) else {
            return Ok(Received::Disconnected);
        };
        let Some(handle) = sock.transport else {
            return Ok(Received::Disconnected);
        };
        let stats = &mut self.stats;

        if !sock.can_send && now - sock.last_send_time > RESEND_INTERVAL {
            if let Err(e) = resend_message(udp, stats, sock, now) {
                log::debug!("resend to {} failed: {}", sock.address, e);
            }
        }

        let mut buf = [0u8; NET_DATAGRAMSIZE];
        let mut ret = Received::Nothing;
        loop {
            let (length, from) = match udp.read(handle, &mut buf) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Read error: {}", e);
                    return Ok(Received::Disconnected);
                }
            };
            if length == 0 {
                break;
            }

            if addr_compare(&from, &sock.addr) != AddrMatch::Same {
                log::debug!("Forged packet received from {} (expected {})", from, sock.addr);
                continue;
            }
            let Some(header) = PacketHeader::decode(&buf[..length]) else {
                stats.short_packet_count += 1;
                continue;
            };
            if header.flags.contains(PacketFlags::CTL) {
                continue;
            }
            if header.length < NET_HEADERSIZE || header.length > length {
                stats.short_packet_count += 1;
                continue;
            }

            let sequence = header.sequence;
            let payload = &buf[NET_HEADERSIZE..header.length];
            stats.packets_received += 1;

            if header.flags.contains(PacketFlags::UNRELIABLE) {
                if sequence < sock.unreliable_receive_sequence {
                    log::debug!("Got a stale datagram");
                    ret = Received::Nothing;
                    break;
                }
                if sequence != sock.unreliable_receive_sequence {
                    let count = sequence - sock.unreliable_receive_sequence;
                    stats.dropped_datagrams += count as u64;
                    log::debug!("Dropped {} datagram(s)", count);
                }
                sock.unreliable_receive_sequence = sequence.wrapping_add(1);
                ctx.message.replace(payload);
                ret = Received::Unreliable;
                break;
            }

            if header.flags.contains(PacketFlags::ACK) {
                if sequence != sock.send_sequence.wrapping_sub(1) {
                    log::debug!("Stale ACK received");
                    continue;
                }
                if sequence != sock.ack_sequence {
                    log::debug!("Duplicate ACK received");
                    continue;
                }
                sock.ack_sequence = sock.ack_sequence.wrapping_add(1);
                if sock.ack_sequence != sock.send_sequence {
                    log::debug!("ack sequencing error");
                }
                if sock.send_message.len() > MAX_DATAGRAM {
                    sock.send_message.drain(..MAX_DATAGRAM);
                    sock.send_next = true;
                } else {
                    sock.send_message.clear();
                    sock.can_send = true;
                }
                continue;
            }

            if header.flags.contains(PacketFlags::DATA) {
                let ack = packet(PacketFlags::ACK, sequence, &[]);
                if let Err(e) = udp.write(handle, &ack, from) {
                    log::debug!("ack to {} failed: {}", from, e);
                }

                if sequence != sock.receive_sequence {
                    stats.received_duplicate_count += 1;
                    continue;
                }
                sock.receive_sequence = sock.receive_sequence.wrapping_add(1);

                let end_of_message = header.flags.contains(PacketFlags::EOM);
                if sock.discarding {
                    sock.discarding = !end_of_message;
                    continue;
                }
                if sock.receive_message.len() + payload.len() > NET_MAXMESSAGE {
                    log::warn!("reassembly overflow from {}, message discarded", sock.address);
                    sock.receive_message.clear();
                    sock.discarding = !end_of_message;
                    continue;
                }
                sock.receive_message.extend_from_slice(payload);
                if !end_of_message {
                    continue;
                }

                ctx.message.replace(&sock.receive_message);
                sock.receive_message.clear();
                ret = Received::Reliable;
                break;
            }
        }

        if sock.send_next {
            if let Err(e) = send_message_next(udp, stats, sock, now) {
                log::debug!("send to {} failed: {}", sock.address, e);
            }
        }

        Ok(ret)
    }

    fn send_message(
        &mut self,
        ctx: &mut NetContext,
        id: SocketId,
        data: &[u8],
    ) -> Result<SendResult, NetError> {
        if data.is_empty() {
            return Err(NetError::ZeroLengthMessage);
        }
        if data.len() > NET_MAXMESSAGE {
            return Err(NetError::MessageTooLarge {
                size: data.len(),
                max: NET_MAXMESSAGE,
            });
        }
        let Some(udp) = self.udp.as_ref() else {
            return Ok(SendResult::Disconnected);
        };
        let now = ctx.time;
        let Some(sock) = ctx.pool.get_mut(id) else {
            return Ok(SendResult::Disconnected);
        };
        if !sock.can_send {
            return Err(NetError::ChannelBusy);
        }

        sock.send_message.clear();
        sock.send_message.extend_from_slice(data);
        sock.can_send = false;
        match send_message_next(udp, &mut self.stats, sock, now) {
            Ok(()) => Ok(SendResult::Sent),
            Err(e) => {
                log::warn!("send to {} failed: {}", sock.address, e);
                Ok(SendResult::Disconnected)
            }
        }
    }

    fn send_unreliable_message(
        &mut self,
        ctx: &mut NetContext,
        id: SocketId,
        data: &[u8],
    ) -> Result<SendResult, NetError> {
        if data.len() > MAX_DATAGRAM {
            return Err(NetError::MessageTooLarge {
                size: data.len(),
                max: MAX_DATAGRAM,
            });
        }
        let Some(udp) = self.udp.as_ref() else {
            return Ok(SendResult::Disconnected);
        };
        let Some(sock) = ctx.pool.get_mut(id) else {
            return Ok(SendResult::Disconnected);
        };
        let Some(handle) = sock.transport else {
            return Ok(SendResult::Disconnected);
        };

        let sequence = sock.unreliable_send_sequence;
        sock.unreliable_send_sequence = sequence.wrapping_add(1);
        match udp.write(handle, &packet(PacketFlags::UNRELIABLE, sequence, data), sock.addr) {
            Ok(_) => {
                self.stats.packets_sent += 1;
                Ok(SendResult::Sent)
            }
            Err(e) => {
                log::warn!("unreliable send to {} failed: {}", sock.address, e);
                Ok(SendResult::Disconnected)
            }
        }
    }

    fn can_send_message(&mut self, ctx: &mut NetContext, id: SocketId) -> Result<bool, NetError> {
        let now = ctx.time;
        let Some(sock) = ctx.pool.get_mut(id) else {
            return Ok(false);
        };
        if sock.send_next {
            if let Some(udp) = self.udp.as_ref() {
                if let Err(e) = send_message_next(udp, &mut self.stats, sock, now) {
                    log::debug!("send to {} failed: {}", sock.address, e);
                }
            }
        }
        Ok(sock.can_send)
    }

    fn close(&mut self, ctx: &mut NetContext, id: SocketId) {
        let handle = ctx.pool.get(id).and_then(|s| s.transport);
        if let (Some(udp), Some(handle)) = (self.udp.as_mut(), handle) {
            udp.close_socket(handle);
        }
    }

    fn shutdown(&mut self, _ctx: &mut NetContext) {
        if let Some(mut udp) = self.udp.take() {
            for probe in [&mut self.players_probe, &mut self.rules_probe] {
                if let Some(handle) = probe.socket.take() {
                    udp.close_socket(handle);
                }
            }
            udp.shutdown();
        }
    }

    fn stats(&self) -> Option<TransportStats> {
        Some(self.stats)
    }

    fn start_probe(
        &mut self,
        ctx: &mut NetContext,
        kind: ProbeKind,
        host: &str,
    ) -> Result<Option<f64>, NetError> {
        self.begin_probe(ctx, kind, host)
    }

    fn poll_probe(&mut self, _ctx: &mut NetContext, kind: ProbeKind) -> Option<f64> {
        match kind {
            ProbeKind::Players => self.poll_players_probe(),
            ProbeKind::Rules => self.poll_rules_probe(),
        }
    }

    fn probe_report(&self, kind: ProbeKind) -> Option<&ProbeReport> {
        match kind {
            ProbeKind::Players => Some(&self.players_probe.report),
            ProbeKind::Rules => Some(&self.rules_probe.report),
        }
    }

    #[cfg(feature = "ban")]
    fn set_ban(&mut self, ban: Option<BanFilter>) {
        self.ban = ban;
    }

    #[cfg(feature = "ban")]
    fn ban(&self) -> Option<BanFilter> {
        self.ban
    }
}

#[cfg(all(test, feature = "ban"))]
mod tests {
    use super::*;

    #[test]
    fn test_ban_filter_mask() {
        let ban = BanFilter::new(
            Ipv4Addr::new(192, 168, 1, 0),
            Some(Ipv4Addr::new(255, 255, 255, 0)),
        );
        assert!(ban.matches(&"192.168.1.77:26000".parse().unwrap()));
        assert!(!ban.matches(&"192.168.2.77:26000".parse().unwrap()));

        let single = BanFilter::new(Ipv4Addr::new(10, 0, 0, 5), None);
        assert!(single.matches(&"10.0.0.5:1".parse().unwrap()));
        assert!(!single.matches(&"10.0.0.6:1".parse().unwrap()));
    }

    #[test]
    fn test_ban_filter_parse() {
        let ban = BanFilter::parse("10.1.0.0", Some("255.255.0.0")).unwrap();
        assert_eq!(ban.describe(), "Banning 10.1.0.0 [255.255.0.0]");
        assert!(BanFilter::parse("not-an-address", None).is_none());
        assert!(BanFilter::parse("10.1.0.0", Some("bogus")).is_none());
    }
}
