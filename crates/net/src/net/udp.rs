use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::NetError;
use crate::net::protocol::NET_NAMELEN;
use crate::stats::PacketLossSimulation;

/// One bound, non-blocking datagram endpoint.
pub trait Datagram: Send {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Datagram for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Host networking facilities the transport needs.
pub trait Network: Send {
    /// Port 0 picks an ephemeral port.
    fn bind(&mut self, port: u16) -> io::Result<Box<dyn Datagram>>;
    fn local_ip(&mut self) -> io::Result<IpAddr>;
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;

    /// Host name registered for `addr`, if any.
    fn reverse_lookup(&self, addr: &SocketAddr) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetwork;

impl Network for SystemNetwork {
    fn bind(&mut self, port: u16) -> io::Result<Box<dyn Datagram>> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        Ok(Box::new(socket))
    }

    fn local_ip(&mut self) -> io::Result<IpAddr> {
        // connect() on UDP only selects a route, nothing is sent.
        let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        probe.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(probe.local_addr()?.ip())
    }

    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address"))
    }

    fn reverse_lookup(&self, addr: &SocketAddr) -> Option<String> {
        let name = dns_lookup::lookup_addr(&addr.ip()).ok()?;
        // getnameinfo answers with the numeric form when no name is registered.
        name.parse::<IpAddr>().is_err().then_some(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMatch {
    Same,
    /// Same host, different port.
    SameHost,
    DifferentHost,
}

pub fn addr_compare(a: &SocketAddr, b: &SocketAddr) -> AddrMatch {
    if a.ip() != b.ip() {
        AddrMatch::DifferentHost
    } else if a.port() != b.port() {
        AddrMatch::SameHost
    } else {
        AddrMatch::Same
    }
}

pub fn addr_to_string(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Parses a full or partial dotted address. Missing leading octets are taken
/// from `local`, so `"5"` means host 5 on the local /24.
pub fn partial_ip_address(text: &str, local: Ipv4Addr, default_port: u16) -> Option<SocketAddr> {
    let (host, port) = match text.split_once(':') {
        Some((host, port)) => (host, port.trim().parse::<u16>().unwrap_or(0)),
        None => (text, default_port),
    };
    let host = host.strip_prefix('.').unwrap_or(host);

    let mut addr: u32 = 0;
    let mut mask: u32 = u32::MAX;
    for part in host.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let num: u32 = part.parse().ok()?;
        if num > 255 {
            return None;
        }
        mask <<= 8;
        addr = (addr << 8).wrapping_add(num);
    }

    let ip = (u32::from(local) & mask) | addr;
    Some(SocketAddr::from((Ipv4Addr::from(ip), port)))
}

pub struct UdpTransport {
    network: Box<dyn Network>,
    sockets: Vec<Option<Box<dyn Datagram>>>,
    my_addr: Ipv4Addr,
    host_port: u16,
    broadcast_socket: Option<UdpHandle>,
    accept_socket: Option<UdpHandle>,
    control_socket: UdpHandle,
    packet_loss: Option<PacketLossSimulation>,
}

impl UdpTransport {
    pub fn init(
        mut network: Box<dyn Network>,
        host_port: u16,
        local_ip: Option<IpAddr>,
        packet_loss: Option<PacketLossSimulation>,
    ) -> Result<Self, NetError> {
        let my_addr = match local_ip {
            Some(IpAddr::V4(ip)) => ip,
            Some(IpAddr::V6(_)) => return Err(NetError::NoLocalAddress),
            None => match network.local_ip() {
                Ok(IpAddr::V4(ip)) if !ip.is_loopback() && !ip.is_unspecified() => ip,
                _ => return Err(NetError::NoLocalAddress),
            },
        };

        let control = network.bind(0).map_err(NetError::ControlSocket)?;
        let transport = Self {
            network,
            sockets: vec![Some(control)],
            my_addr,
            host_port,
            broadcast_socket: None,
            accept_socket: None,
            control_socket: UdpHandle(0),
            packet_loss: packet_loss.filter(|sim| sim.enabled),
        };

        log::info!("UDP Initialized ({})", transport.my_address());
        Ok(transport)
    }

    pub fn shutdown(&mut self) {
        self.listen(false).ok();
        self.sockets.clear();
        self.broadcast_socket = None;
    }

    pub fn my_addr(&self) -> Ipv4Addr {
        self.my_addr
    }

    /// Local address as shown to users, without a port.
    pub fn my_address(&self) -> String {
        self.my_addr.to_string()
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    pub fn set_host_port(&mut self, port: u16) {
        self.host_port = port;
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::BROADCAST, self.host_port))
    }

    pub fn control_socket(&self) -> UdpHandle {
        self.control_socket
    }

    pub fn accept_socket(&self) -> Option<UdpHandle> {
        self.accept_socket
    }

    pub fn is_listening(&self) -> bool {
        self.accept_socket.is_some()
    }

    pub fn listen(&mut self, state: bool) -> Result<(), NetError> {
        if state {
            if self.accept_socket.is_some() {
                return Ok(());
            }
            let port = self.host_port;
            let handle = self
                .open_socket(port)
                .map_err(|source| NetError::AcceptSocket { port, source })?;
            self.accept_socket = Some(handle);
        } else if let Some(handle) = self.accept_socket.take() {
            self.close_socket(handle);
        }
        Ok(())
    }

    pub fn open_socket(&mut self, port: u16) -> io::Result<UdpHandle> {
        let socket = self.network.bind(port)?;
        let index = match self.sockets.iter().position(Option::is_none) {
            Some(index) => {
                self.sockets[index] = Some(socket);
                index
            }
            None => {
                self.sockets.push(Some(socket));
                self.sockets.len() - 1
            }
        };
        Ok(UdpHandle(index))
    }

    pub fn close_socket(&mut self, handle: UdpHandle) {
        if self.broadcast_socket == Some(handle) {
            self.broadcast_socket = None;
        }
        if let Some(slot) = self.sockets.get_mut(handle.0) {
            *slot = None;
        }
    }

    fn socket(&self, handle: UdpHandle) -> io::Result<&dyn Datagram> {
        self.sockets
            .get(handle.0)
            .and_then(|s| s.as_deref())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }

    /// `Ok(None)` when nothing is waiting.
    pub fn read(
        &self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket(handle)?.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn write(&self, handle: UdpHandle, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let socket = self.socket(handle)?;
        if self.packet_loss.as_ref().is_some_and(|sim| sim.should_drop()) {
            return Ok(buf.len());
        }
        match socket.send_to(buf, addr) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    /// Only one endpoint may ever broadcast at a time.
    pub fn broadcast(&mut self, handle: UdpHandle, buf: &[u8]) -> Result<usize, NetError> {
        match self.broadcast_socket {
            Some(owner) if owner != handle => return Err(NetError::BroadcastInUse),
            _ => self.broadcast_socket = Some(handle),
        }
        Ok(self.write(handle, buf, self.broadcast_addr())?)
    }

    /// Local address of an endpoint, with wildcard or loopback hosts
    /// replaced by the machine's own address.
    pub fn socket_addr(&self, handle: UdpHandle) -> io::Result<SocketAddr> {
        let mut addr = self.socket(handle)?.local_addr()?;
        if addr.ip().is_unspecified() || addr.ip().is_loopback() {
            addr.set_ip(IpAddr::V4(self.my_addr));
        }
        Ok(addr)
    }

    pub fn name_from_addr(&self, addr: &SocketAddr) -> String {
        match self.network.reverse_lookup(addr) {
            Some(mut name) => {
                truncate_name(&mut name, NET_NAMELEN - 1);
                name
            }
            None => addr_to_string(addr),
        }
    }

    /// Accepts `host[:port]`; the port defaults to the host port.
    pub fn addr_from_name(&self, name: &str) -> Option<SocketAddr> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if name.as_bytes()[0].is_ascii_digit() {
            return partial_ip_address(name, self.my_addr, self.host_port);
        }
        let (host, port) = match name.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (name, self.host_port),
        };
        self.network.resolve(host, port).ok()
    }
}

fn truncate_name(name: &mut String, max: usize) {
    if name.len() > max {
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
}
