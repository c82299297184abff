use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::{PacketFlags, PacketHeader};
use super::udp::{Datagram, Network};
use crate::stats::PacketLossSimulation;

const FIRST_EPHEMERAL_PORT: u16 = 50000;

#[derive(Debug, Clone)]
pub struct WireRecord {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
    pub delivered: bool,
}

impl WireRecord {
    /// Header of a sequenced packet; `None` for control frames.
    pub fn header(&self) -> Option<PacketHeader> {
        PacketHeader::decode(&self.data).filter(|h| !h.flags.contains(PacketFlags::CTL))
    }

    pub fn is_control(&self) -> bool {
        self.data.first().is_some_and(|b| b & 0x80 != 0)
    }
}

type DropRule = Box<dyn FnMut(&WireRecord) -> bool + Send>;

#[derive(Default)]
struct WireState {
    queues: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    next_port: HashMap<IpAddr, u16>,
    names: HashMap<String, IpAddr>,
    log: Vec<WireRecord>,
    drop_rules: Vec<DropRule>,
    loss: HashMap<IpAddr, PacketLossSimulation>,
}

impl WireState {
    fn should_drop(&mut self, record: &WireRecord) -> bool {
        let mut dropped = false;
        for rule in &mut self.drop_rules {
            if rule(record) {
                dropped = true;
            }
        }
        dropped
            || self
                .loss
                .get(&record.from.ip())
                .is_some_and(|sim| sim.should_drop())
    }

    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let mut record = WireRecord {
            from,
            to,
            data: data.to_vec(),
            delivered: false,
        };
        if !self.should_drop(&record) {
            if to.ip() == IpAddr::V4(Ipv4Addr::BROADCAST) {
                for (addr, queue) in &mut self.queues {
                    if addr.port() == to.port() {
                        queue.push_back((data.to_vec(), from));
                        record.delivered = true;
                    }
                }
            } else if let Some(queue) = self.queues.get_mut(&to) {
                queue.push_back((data.to_vec(), from));
                record.delivered = true;
            }
        }
        self.log.push(record);
    }
}

/// In-memory datagram medium shared by any number of simulated hosts.
#[derive(Clone, Default)]
pub struct SimWire {
    state: Arc<Mutex<WireState>>,
}

impl SimWire {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WireState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn host(&self, ip: IpAddr) -> SimNetwork {
        SimNetwork {
            wire: self.clone(),
            ip,
        }
    }

    pub fn add_name(&self, name: &str, ip: IpAddr) {
        self.lock().names.insert(name.to_ascii_lowercase(), ip);
    }

    /// Every datagram offered to the wire so far, dropped ones included.
    pub fn sent(&self) -> Vec<WireRecord> {
        self.lock().log.clone()
    }

    pub fn sent_from(&self, from: SocketAddr) -> Vec<WireRecord> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.from == from)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Drops every datagram for which `rule` returns true.
    pub fn drop_matching<F>(&self, rule: F)
    where
        F: FnMut(&WireRecord) -> bool + Send + 'static,
    {
        self.lock().drop_rules.push(Box::new(rule));
    }

    pub fn clear_drop_rules(&self) {
        self.lock().drop_rules.clear();
    }

    pub fn set_loss(&self, ip: IpAddr, config: PacketLossSimulation) {
        let mut state = self.lock();
        if config.enabled {
            state.loss.insert(ip, config);
        } else {
            state.loss.remove(&ip);
        }
    }

    /// Delivers a datagram claiming to come from `from`.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.lock().deliver(from, to, data);
    }

    /// Removes the endpoint at `addr` from the wire; its owner's reads fail.
    pub fn unbind(&self, addr: SocketAddr) {
        self.lock().queues.remove(&addr);
    }

    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.lock().queues.contains_key(&addr)
    }

    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }
}

pub struct SimNetwork {
    wire: SimWire,
    ip: IpAddr,
}

impl SimNetwork {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Raw endpoint on this host, for driving the wire by hand.
    pub fn bind_raw(&mut self, port: u16) -> io::Result<SimSocket> {
        let mut guard = self.wire.lock();
        let state = &mut *guard;
        let port = if port == 0 {
            let next = state.next_port.entry(self.ip).or_insert(FIRST_EPHEMERAL_PORT);
            while state.queues.contains_key(&SocketAddr::new(self.ip, *next)) {
                *next = next.wrapping_add(1);
            }
            let port = *next;
            *next = next.wrapping_add(1);
            port
        } else {
            port
        };

        let addr = SocketAddr::new(self.ip, port);
        if state.queues.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} already bound", addr),
            ));
        }
        state.queues.insert(addr, VecDeque::new());
        Ok(SimSocket {
            wire: self.wire.clone(),
            addr,
        })
    }
}

impl Network for SimNetwork {
    fn bind(&mut self, port: u16) -> io::Result<Box<dyn Datagram>> {
        Ok(Box::new(self.bind_raw(port)?))
    }

    fn local_ip(&mut self) -> io::Result<IpAddr> {
        Ok(self.ip)
    }

    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        self.wire
            .lock()
            .names
            .get(&host.to_ascii_lowercase())
            .map(|ip| SocketAddr::new(*ip, port))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)))
    }

    fn reverse_lookup(&self, addr: &SocketAddr) -> Option<String> {
        self.wire
            .lock()
            .names
            .iter()
            .filter(|(_, ip)| **ip == addr.ip())
            .map(|(name, _)| name.clone())
            .min()
    }
}

pub struct SimSocket {
    wire: SimWire,
    addr: SocketAddr,
}

impl SimSocket {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Datagram for SimSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut state = self.wire.lock();
        let queue = state
            .queues
            .get_mut(&self.addr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket unbound"))?;
        match queue.pop_front() {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.wire.lock().deliver(self.addr, addr, buf);
        Ok(buf.len())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.wire.lock().queues.remove(&self.addr);
    }
}
