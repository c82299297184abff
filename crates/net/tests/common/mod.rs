#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use qnet::net::{PacketFlags, SimWire, WireRecord};
use qnet::{ManualClock, NetConfig, NetStack, Received, SizeBuf, SocketId};

pub const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
pub const CLIENT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

pub fn server_config() -> NetConfig {
    NetConfig {
        listen: true,
        host_name: "arena".to_string(),
        ..Default::default()
    }
}

pub fn client_config() -> NetConfig {
    NetConfig {
        host_name: "player".to_string(),
        ..Default::default()
    }
}

pub fn stack_on(wire: &SimWire, ip: IpAddr, config: NetConfig, clock: &ManualClock) -> NetStack {
    NetStack::with_network(config, Box::new(clock.clone()), Box::new(wire.host(ip)))
        .expect("stack init")
}

/// Answers connection and info requests on a background thread until stopped.
pub struct Serving {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(NetStack, Vec<SocketId>)>,
}

impl Serving {
    pub fn start(mut server: NetStack) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut accepted = Vec::new();
            while !flag.load(Ordering::SeqCst) {
                if let Some(id) = server.check_new_connections().expect("check connections") {
                    accepted.push(id);
                }
                thread::sleep(Duration::from_micros(50));
            }
            (server, accepted)
        });
        Self { stop, handle }
    }

    pub fn stop(self) -> (NetStack, Vec<SocketId>) {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().expect("server thread")
    }
}

pub struct Pair {
    pub wire: SimWire,
    pub server: NetStack,
    pub server_clock: ManualClock,
    pub server_id: SocketId,
    pub client: NetStack,
    pub client_clock: ManualClock,
    pub client_id: SocketId,
}

impl Pair {
    pub fn client_addr(&self) -> SocketAddr {
        self.server.socket_peer_addr(self.server_id).unwrap()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.client.socket_peer_addr(self.client_id).unwrap()
    }

    /// Data and ack frames sent by `ip` since the last `wire.clear_log()`.
    pub fn frames_from(&self, ip: IpAddr, flag: PacketFlags) -> Vec<WireRecord> {
        self.wire
            .sent()
            .into_iter()
            .filter(|r| r.from.ip() == ip)
            .filter(|r| r.header().is_some_and(|h| h.flags.contains(flag)))
            .collect()
    }

    /// Moves one message from client to server, pumping both sides until the
    /// server delivers it and the client may send again.
    pub fn deliver_to_server(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = SizeBuf::alloc(data.len().max(1));
        buf.write(data).unwrap();
        self.client.send_message(self.client_id, &buf).unwrap();

        let mut delivered = None;
        for _ in 0..64 {
            if delivered.is_none() {
                if self.server.get_message(self.server_id).unwrap() == Received::Reliable {
                    delivered = Some(self.server.message().data().to_vec());
                }
            } else {
                self.server.get_message(self.server_id).unwrap();
            }
            self.client.get_message(self.client_id).unwrap();
            if delivered.is_some() && self.client.can_send_message(self.client_id).unwrap() {
                break;
            }
        }
        delivered.expect("message not delivered")
    }
}

pub fn connected_pair_with(server_config: NetConfig) -> Pair {
    let wire = SimWire::new();
    let server_clock = ManualClock::new();
    let server = stack_on(&wire, SERVER_IP, server_config, &server_clock);
    let client_clock = ManualClock::with_step(0.001);
    let mut client = stack_on(&wire, CLIENT_IP, client_config(), &client_clock);

    let serving = Serving::start(server);
    let client_id = client.connect(Some("10.0.0.2")).expect("connect");
    let (server, accepted) = serving.stop();
    assert_eq!(accepted.len(), 1);

    Pair {
        wire,
        server,
        server_clock,
        server_id: accepted[0],
        client,
        client_clock,
        client_id,
    }
}

pub fn connected_pair() -> Pair {
    connected_pair_with(server_config())
}
