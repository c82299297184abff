use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "ban")]
use qnet::net::BanFilter;
use qnet::{
    ConnectError, MsgReader, NetError, NetStack, PlayerRecord, ProbeKind, Received, SizeBuf,
    SocketId,
};

use crate::config::HostConfig;
use crate::console::{BanArgs, Command, parse_command};
use crate::events::{DisconnectReason, HostEvent};

pub const SVC_DISCONNECT: i32 = 2;
pub const SVC_PRINT: i32 = 8;
pub const CLC_DISCONNECT: i32 = 2;
pub const CLC_STRINGCMD: i32 = 4;

/// One end of a connection plus the reliable messages waiting for the
/// channel to free up.
#[derive(Debug)]
struct Peer {
    id: SocketId,
    address: String,
    outbox: VecDeque<SizeBuf>,
}

impl Peer {
    fn new(id: SocketId, address: String) -> Self {
        Self {
            id,
            address,
            outbox: VecDeque::new(),
        }
    }
}

enum Inbound {
    Text(String),
    Disconnect,
}

fn encode(command: i32, text: &str) -> Result<SizeBuf, NetError> {
    let mut buf = SizeBuf::alloc(text.len() + 2);
    buf.write_byte(command)?;
    buf.write_string(text)?;
    Ok(buf)
}

fn notice(command: i32) -> Result<SizeBuf, NetError> {
    let mut buf = SizeBuf::alloc(1);
    buf.write_byte(command)?;
    Ok(buf)
}

/// Splits a message into the text commands it carries. Anything after an
/// unknown command byte is ignored.
fn decode(data: &[u8], text_command: i32, disconnect: i32) -> Vec<Inbound> {
    let mut reader = MsgReader::new(data);
    let mut out = Vec::new();
    loop {
        let command = reader.read_byte();
        if command == -1 {
            break;
        }
        if command == text_command {
            out.push(Inbound::Text(reader.read_string()));
        } else if command == disconnect {
            out.push(Inbound::Disconnect);
        } else {
            log::warn!("unknown message command {}", command);
            break;
        }
    }
    out
}

/// A host process: a server accepting clients, a client joined to one
/// server, or both at once.
pub struct Host {
    net: NetStack,
    config: HostConfig,
    clients: Vec<Peer>,
    server: Option<Peer>,
    running: Arc<AtomicBool>,
    frame_duration: Duration,
    pending_events: VecDeque<HostEvent>,
}

impl Host {
    pub fn new(config: HostConfig) -> Result<Self, NetError> {
        let net = NetStack::system(config.net.clone())?;
        Ok(Self::with_stack(net, config))
    }

    pub fn with_stack(mut net: NetStack, config: HostConfig) -> Self {
        if let Some(map) = &config.map {
            let status = net.server_status_mut();
            status.level_name = map.clone();
            status.active = true;
        }
        let frame_duration = Duration::from_secs_f64(1.0 / config.frame_rate.max(1) as f64);
        Self {
            net,
            config,
            clients: Vec::new(),
            server: None,
            running: Arc::new(AtomicBool::new(true)),
            frame_duration,
            pending_events: VecDeque::new(),
        }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn net(&self) -> &NetStack {
        &self.net
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = HostEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_some()
    }

    /// Joins the server named on the command line, if any.
    pub fn start(&mut self) {
        if let Some(target) = self.config.connect.clone() {
            self.connect(Some(&target));
        }
    }

    pub fn frame(&mut self) {
        if let Err(e) = self.run_frame() {
            self.pending_events.push_back(HostEvent::Error {
                message: format!("Network error: {}", e),
            });
        }
    }

    fn run_frame(&mut self) -> Result<(), NetError> {
        self.net.poll()?;
        self.accept_clients()?;
        self.read_clients()?;
        self.read_server()?;
        self.flush_outboxes()
    }

    fn accept_clients(&mut self) -> Result<(), NetError> {
        while let Some(id) = self.net.check_new_connections()? {
            let address = self.net.socket_address(id).unwrap_or_default();
            self.net.server_status_mut().players.push(PlayerRecord {
                name: address.clone(),
                colors: 0,
                frags: 0,
                socket: Some(id),
            });
            let mut peer = Peer::new(id, address.clone());
            let welcome = format!("Welcome to {}\n", self.net.server_status().host_name);
            peer.outbox.push_back(encode(SVC_PRINT, &welcome)?);
            self.clients.push(peer);
            self.pending_events
                .push_back(HostEvent::ClientConnected { id, address });
        }
        Ok(())
    }

    fn read_clients(&mut self) -> Result<(), NetError> {
        let mut dropped = Vec::new();
        let mut chat = Vec::new();

        for peer in &self.clients {
            loop {
                match self.net.get_message(peer.id)? {
                    Received::Nothing => break,
                    Received::Disconnected => {
                        dropped.push((peer.id, DisconnectReason::Dropped));
                        break;
                    }
                    Received::Reliable | Received::Unreliable => {}
                }
                let data = self.net.message().data().to_vec();
                let mut disconnect = false;
                for inbound in decode(&data, CLC_STRINGCMD, CLC_DISCONNECT) {
                    match inbound {
                        Inbound::Text(text) => match text.strip_prefix("say ") {
                            Some(said) => chat.push((peer.address.clone(), said.to_string())),
                            None => log::debug!("{} sent \"{}\"", peer.address, text),
                        },
                        Inbound::Disconnect => disconnect = true,
                    }
                }
                if disconnect {
                    dropped.push((peer.id, DisconnectReason::Graceful));
                    break;
                }
            }
        }

        for (from, text) in chat {
            self.broadcast_print(&format!("{}: {}\n", from, text))?;
            self.pending_events.push_back(HostEvent::Chat { from, text });
        }
        for (id, reason) in dropped {
            self.drop_client(id, reason);
        }
        Ok(())
    }

    fn read_server(&mut self) -> Result<(), NetError> {
        let Some(id) = self.server.as_ref().map(|p| p.id) else {
            return Ok(());
        };
        loop {
            match self.net.get_message(id)? {
                Received::Nothing => return Ok(()),
                Received::Disconnected => {
                    self.drop_server(DisconnectReason::Dropped);
                    return Ok(());
                }
                Received::Reliable | Received::Unreliable => {}
            }
            let data = self.net.message().data().to_vec();
            for inbound in decode(&data, SVC_PRINT, SVC_DISCONNECT) {
                match inbound {
                    Inbound::Text(text) => self.pending_events.push_back(HostEvent::ServerPrint {
                        text: text.trim_end().to_string(),
                    }),
                    Inbound::Disconnect => {
                        self.drop_server(DisconnectReason::Graceful);
                        return Ok(());
                    }
                }
            }
        }
    }

    fn flush_outboxes(&mut self) -> Result<(), NetError> {
        for peer in self.clients.iter_mut().chain(self.server.iter_mut()) {
            if peer.outbox.is_empty() || !self.net.can_send_message(peer.id)? {
                continue;
            }
            if let Some(buf) = peer.outbox.pop_front() {
                self.net.send_message(peer.id, &buf)?;
            }
        }
        Ok(())
    }

    fn broadcast_print(&mut self, text: &str) -> Result<(), NetError> {
        let data = encode(SVC_PRINT, text)?;
        for peer in &mut self.clients {
            peer.outbox.push_back(data.clone());
        }
        Ok(())
    }

    fn drop_client(&mut self, id: SocketId, reason: DisconnectReason) {
        let Some(index) = self.clients.iter().position(|p| p.id == id) else {
            return;
        };
        let peer = self.clients.remove(index);
        self.net.close(id);
        self.net
            .server_status_mut()
            .players
            .retain(|p| p.socket != Some(id));
        self.pending_events.push_back(HostEvent::ClientDisconnected {
            id,
            address: peer.address,
            reason,
        });
    }

    fn drop_server(&mut self, reason: DisconnectReason) {
        if let Some(peer) = self.server.take() {
            self.net.close(peer.id);
            self.pending_events.push_back(HostEvent::ServerDisconnected {
                address: peer.address,
                reason,
            });
        }
    }

    fn disconnect(&mut self) {
        let Some(id) = self.server.as_ref().map(|p| p.id) else {
            return;
        };
        let sent =
            notice(CLC_DISCONNECT).and_then(|buf| self.net.send_unreliable_message(id, &buf));
        if let Err(e) = sent {
            log::debug!("disconnect notice failed: {}", e);
        }
        self.drop_server(DisconnectReason::Graceful);
    }

    fn connect(&mut self, host: Option<&str>) {
        self.disconnect();
        match self.net.connect(host) {
            Ok(id) => {
                let address = self.net.socket_address(id).unwrap_or_default();
                log::info!("Connected to {}", address);
                self.server = Some(Peer::new(id, address));
            }
            Err(ConnectError::Fatal(e)) => self.pending_events.push_back(HostEvent::Error {
                message: format!("connect failed: {}", e),
            }),
            Err(e) => log::info!("{}", e),
        }
    }

    pub fn execute_line(&mut self, line: &str) {
        match parse_command(line) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => {}
            Err(e) => log::info!("{}", e),
        }
    }

    pub fn execute(&mut self, command: Command) {
        if let Err(e) = self.execute_inner(command) {
            match e {
                NetError::InvalidPort(_) => log::info!("Bad value, must be between 1 and 65534"),
                NetError::ServerActive => {
                    log::info!("maxplayers can not be changed while a server is running.")
                }
                e => self.pending_events.push_back(HostEvent::Error {
                    message: e.to_string(),
                }),
            }
        }
    }

    fn execute_inner(&mut self, command: Command) -> Result<(), NetError> {
        match command {
            Command::Listen(None) => {
                log::info!("\"listen\" is \"{}\"", u8::from(self.net.is_listening()))
            }
            Command::Listen(Some(state)) => self.net.listen(state)?,
            Command::Port(None) => log::info!("\"port\" is \"{}\"", self.net.host_port()),
            Command::Port(Some(port)) => self.net.set_port(port)?,
            Command::MaxPlayers(None) => {
                log::info!("\"maxplayers\" is \"{}\"", self.net.max_players())
            }
            Command::MaxPlayers(Some(n)) => {
                self.net.set_max_players(n)?;
            }
            Command::Slist => self.net.slist(),
            Command::NetStats(target) => {
                for line in self.net.net_stats(target.as_deref()) {
                    log::info!("{}", line);
                }
            }
            Command::Connect(host) => self.connect(host.as_deref()),
            Command::Test(host) => {
                self.net.start_probe(ProbeKind::Players, &host)?;
            }
            Command::Test2(host) => {
                self.net.start_probe(ProbeKind::Rules, &host)?;
            }
            Command::Ban(args) => self.ban(args),
            Command::Say(text) => self.say(&text)?,
            Command::Status => self.status(),
            Command::Quit => self.running.store(false, Ordering::SeqCst),
        }
        Ok(())
    }

    fn say(&mut self, text: &str) -> Result<(), NetError> {
        if let Some(server) = self.server.as_mut() {
            server
                .outbox
                .push_back(encode(CLC_STRINGCMD, &format!("say {}", text))?);
            return Ok(());
        }
        if self.clients.is_empty() {
            log::info!("Not connected");
            return Ok(());
        }
        let host_name = self.net.server_status().host_name.clone();
        self.broadcast_print(&format!("{}: {}\n", host_name, text))
    }

    #[cfg(feature = "ban")]
    fn ban(&mut self, args: BanArgs) {
        match args {
            BanArgs::Show => match self.net.ban() {
                Some(ban) => log::info!("{}", ban.describe()),
                None => log::info!("Banning not active"),
            },
            BanArgs::Off => self.net.set_ban(None),
            BanArgs::Set { addr, mask } => match BanFilter::parse(&addr, mask.as_deref()) {
                Some(ban) => self.net.set_ban(Some(ban)),
                None => log::info!("BAN ip_address [mask]"),
            },
            BanArgs::Usage => log::info!("BAN ip_address [mask]"),
        }
    }

    #[cfg(not(feature = "ban"))]
    fn ban(&mut self, _args: BanArgs) {
        log::info!("ban is not available in this build");
    }

    fn status(&self) {
        let status = self.net.server_status();
        log::info!("host:    {}", status.host_name);
        log::info!("map:     {}", status.level_name);
        log::info!(
            "players: {} active ({} max)",
            self.clients.len(),
            self.net.max_players()
        );
        let now = self.net.now();
        for peer in &self.clients {
            let connected = self
                .net
                .socket_connect_time(peer.id)
                .map_or(0.0, |t| now - t);
            log::info!("  {:<21} {:>6.0}s", peer.address, connected);
        }
        if let Some(server) = &self.server {
            log::info!("connected to {}", server.address);
        }
    }

    /// Tells every client the server is going away, then closes the stack.
    pub fn shutdown(&mut self) {
        self.disconnect();
        if !self.clients.is_empty() {
            let block = self.config.shutdown_block;
            match notice(SVC_DISCONNECT).and_then(|buf| self.net.send_to_all(&buf, block)) {
                Ok(0) => {}
                Ok(pending) => log::info!("{} clients did not acknowledge shutdown", pending),
                Err(e) => log::warn!("shutdown notice failed: {}", e),
            }
        }
        self.clients.clear();
        self.net.shutdown();
    }
}
