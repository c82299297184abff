use std::net::{Ipv4Addr, SocketAddr};

use super::protocol::NET_MAXMESSAGE;
use super::udp::UdpHandle;

pub const UNSET_ADDRESS: &str = "UNSET ADDRESS";

/// Handle to a logical socket. The generation makes a handle to a freed and
/// reused slot read as disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId {
    index: u32,
    generation: u32,
}

impl SocketId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Stable non-zero number for logs and recordings.
    pub fn session(&self) -> u64 {
        ((self.generation as u64) << 32 | self.index as u64) + 1
    }
}

#[derive(Debug, Clone)]
pub struct QSocket {
    pub driver: usize,
    pub transport: Option<UdpHandle>,
    pub addr: SocketAddr,
    pub address: String,

    pub connect_time: f64,
    pub last_message_time: f64,
    pub last_send_time: f64,

    pub disconnected: bool,
    pub can_send: bool,
    pub send_next: bool,

    pub ack_sequence: u32,
    pub send_sequence: u32,
    pub unreliable_send_sequence: u32,
    /// Unacknowledged remainder of the outstanding reliable message.
    pub send_message: Vec<u8>,

    pub receive_sequence: u32,
    pub unreliable_receive_sequence: u32,
    pub receive_message: Vec<u8>,
    /// Set while the rest of an over-length reliable message is skipped.
    pub discarding: bool,

    generation: u32,
}

impl QSocket {
    fn empty() -> Self {
        Self {
            driver: 0,
            transport: None,
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            address: UNSET_ADDRESS.to_string(),
            connect_time: 0.0,
            last_message_time: 0.0,
            last_send_time: 0.0,
            disconnected: true,
            can_send: true,
            send_next: false,
            ack_sequence: 0,
            send_sequence: 0,
            unreliable_send_sequence: 0,
            send_message: Vec::with_capacity(NET_MAXMESSAGE),
            receive_sequence: 0,
            unreliable_receive_sequence: 0,
            receive_message: Vec::with_capacity(NET_MAXMESSAGE),
            discarding: false,
            generation: 0,
        }
    }

    fn reset(&mut self, driver: usize, now: f64) {
        self.driver = driver;
        self.transport = None;
        self.addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        self.address = UNSET_ADDRESS.to_string();
        self.connect_time = now;
        self.last_message_time = now;
        self.last_send_time = 0.0;
        self.disconnected = false;
        self.can_send = true;
        self.send_next = false;
        self.ack_sequence = 0;
        self.send_sequence = 0;
        self.unreliable_send_sequence = 0;
        self.send_message.clear();
        self.receive_sequence = 0;
        self.unreliable_receive_sequence = 0;
        self.receive_message.clear();
        self.discarding = false;
    }

    pub fn stats(&self) -> SocketStats {
        SocketStats {
            address: self.address.clone(),
            can_send: self.can_send,
            send_next: self.send_next,
            ack_sequence: self.ack_sequence,
            send_sequence: self.send_sequence,
            receive_sequence: self.receive_sequence,
            unreliable_send_sequence: self.unreliable_send_sequence,
            unreliable_receive_sequence: self.unreliable_receive_sequence,
            send_pending: self.send_message.len(),
            disconnected: self.disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketStats {
    pub address: String,
    pub can_send: bool,
    pub send_next: bool,
    pub ack_sequence: u32,
    pub send_sequence: u32,
    pub receive_sequence: u32,
    pub unreliable_send_sequence: u32,
    pub unreliable_receive_sequence: u32,
    pub send_pending: usize,
    pub disconnected: bool,
}

impl SocketStats {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("address          = {}", self.address),
            format!("canSend          = {}", u8::from(self.can_send)),
            format!("sendSeq          = {:4}", self.send_sequence),
            format!("recvSeq          = {:4}", self.receive_sequence),
        ]
    }
}

/// Fixed arena of logical sockets: a free stack plus an active list.
#[derive(Debug)]
pub struct SocketPool {
    slots: Vec<QSocket>,
    free: Vec<usize>,
    active: Vec<usize>,
    max_clients: usize,
}

impl SocketPool {
    pub fn new(capacity: usize, max_clients: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| QSocket::empty()).collect(),
            free: (0..capacity).rev().collect(),
            active: Vec::with_capacity(capacity),
            max_clients,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// `None` when the pool is exhausted or the client limit is reached.
    pub fn new_socket(&mut self, driver: usize, now: f64) -> Option<SocketId> {
        if self.active.len() >= self.max_clients {
            return None;
        }
        let index = self.free.pop()?;
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.reset(driver, now);
        let generation = slot.generation;
        self.active.push(index);
        self.debug_check();
        Some(SocketId {
            index: index as u32,
            generation,
        })
    }

    pub fn free_socket(&mut self, id: SocketId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        let index = id.index();
        let Some(position) = self.active.iter().position(|&i| i == index) else {
            log::warn!("free_socket: socket {} not in active list", index);
            return false;
        };
        self.active.remove(position);
        self.slots[index].disconnected = true;
        self.slots[index].transport = None;
        self.free.push(index);
        self.debug_check();
        true
    }

    fn is_current(&self, id: SocketId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|s| s.generation == id.generation)
    }

    pub fn get(&self, id: SocketId) -> Option<&QSocket> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut QSocket> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
    }

    pub fn is_disconnected(&self, id: SocketId) -> bool {
        self.get(id).is_none_or(|s| s.disconnected)
    }

    pub fn active_ids(&self) -> Vec<SocketId> {
        self.active
            .iter()
            .map(|&index| SocketId {
                index: index as u32,
                generation: self.slots[index].generation,
            })
            .collect()
    }

    pub fn active(&self) -> impl Iterator<Item = (SocketId, &QSocket)> + '_ {
        self.active.iter().map(|&index| {
            let socket = &self.slots[index];
            (
                SocketId {
                    index: index as u32,
                    generation: socket.generation,
                },
                socket,
            )
        })
    }

    /// Case-insensitive search by display address over active and free slots.
    pub fn find_by_address(&self, address: &str) -> Option<&QSocket> {
        self.active
            .iter()
            .chain(self.free.iter())
            .map(|&index| &self.slots[index])
            .find(|socket| socket.address.eq_ignore_ascii_case(address))
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.active.len() + self.free.len(), self.slots.len());
        debug_assert!(self.active.iter().all(|i| !self.free.contains(i)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_socket_initial_state() {
        let mut pool = SocketPool::new(4, 4);
        let id = pool.new_socket(0, 12.5).unwrap();
        let socket = pool.get(id).unwrap();

        assert!(socket.can_send);
        assert!(!socket.send_next);
        assert!(!socket.disconnected);
        assert_eq!(socket.send_sequence, 0);
        assert_eq!(socket.receive_sequence, 0);
        assert_eq!(socket.connect_time, 12.5);
        assert_eq!(socket.last_message_time, 12.5);
        assert_eq!(socket.address, UNSET_ADDRESS);
    }

    #[test]
    fn test_admission_limit() {
        let mut pool = SocketPool::new(4, 2);
        assert!(pool.new_socket(0, 0.0).is_some());
        assert!(pool.new_socket(0, 0.0).is_some());
        assert!(pool.new_socket(0, 0.0).is_none());
        assert_eq!(pool.active_count(), 2);

        pool.set_max_clients(4);
        assert!(pool.new_socket(0, 0.0).is_some());
        assert!(pool.new_socket(0, 0.0).is_some());
        assert!(pool.new_socket(0, 0.0).is_none());
    }

    #[test]
    fn test_free_then_reuse_detects_stale_handle() {
        let mut pool = SocketPool::new(1, 1);
        let first = pool.new_socket(0, 0.0).unwrap();
        pool.get_mut(first).unwrap().send_sequence = 9;

        assert!(pool.free_socket(first));
        assert!(pool.is_disconnected(first));
        assert!(!pool.free_socket(first));

        let second = pool.new_socket(0, 1.0).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(pool.is_disconnected(first));
        assert!(!pool.is_disconnected(second));
        assert_eq!(pool.get(second).unwrap().send_sequence, 0);
        assert!(pool.get(first).is_none());
    }

    #[test]
    fn test_sessions_are_distinct() {
        let mut pool = SocketPool::new(2, 2);
        let a = pool.new_socket(0, 0.0).unwrap();
        let b = pool.new_socket(0, 0.0).unwrap();
        assert_ne!(a.session(), b.session());
        assert_ne!(a.session(), 0);
    }

    #[test]
    fn test_find_by_address_ignores_case() {
        let mut pool = SocketPool::new(2, 2);
        let id = pool.new_socket(0, 0.0).unwrap();
        pool.get_mut(id).unwrap().address = "Quake.Example:26000".to_string();
        assert!(pool.find_by_address("quake.example:26000").is_some());
        assert!(pool.find_by_address("other:26000").is_none());
    }
}
