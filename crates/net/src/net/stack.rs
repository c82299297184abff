use std::net::SocketAddr;
use std::path::Path;

use crate::config::NetConfig;
use crate::error::{ConnectError, NetError};
use crate::msg::MsgReader;
use crate::sizebuf::SizeBuf;
use crate::stats::{NetStats, TransportStats};
use crate::time::{Clock, SystemClock};

#[cfg(feature = "ban")]
use super::datagram::BanFilter;
use super::datagram::DatagramDriver;
use super::driver::{NetContext, NetDriver, Received, SendResult};
use super::hostcache::HostCache;
use super::poll::PollScheduler;
use super::probe::{ProbeKind, ProbeReport};
use super::protocol::NET_MAXMESSAGE;
use super::socket::{SocketId, SocketPool, SocketStats};
use super::status::ServerStatus;
use super::udp::Network;
use super::vcr::{VcrDriver, VcrRecord, VcrRecorder};

/// Seconds after the start of a server list request during which the
/// broadcast is repeated.
pub const SLIST_SEND_WINDOW: f64 = 0.5;
pub const SLIST_SEND_INTERVAL: f64 = 0.75;
pub const SLIST_POLL_INTERVAL: f64 = 0.1;
/// Seconds a server list request stays open.
pub const SLIST_DURATION: f64 = 1.5;

/// `connect("local")` goes to our own listening port.
pub const LOCAL_HOST: &str = "127.0.0.1";

const SLIST_HEADER: [&str; 2] = [
    "Server          Map             Users",
    "--------------- --------------- -----",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTask {
    SlistSend,
    SlistPoll,
    /// A player or rule query owned by the driver at this level.
    Probe(ProbeKind, usize),
}

struct DriverSlot {
    driver: Box<dyn NetDriver>,
    initialized: bool,
}

#[derive(Debug, Default)]
struct SlistState {
    in_progress: bool,
    silent: bool,
    start_time: f64,
    last_shown: usize,
}

/// The network layer: every driver plus the state they share.
pub struct NetStack {
    ctx: NetContext,
    drivers: Vec<DriverSlot>,
    scheduler: PollScheduler<PollTask>,
    listening: bool,
    playback: bool,
    slist: SlistState,
    stats: NetStats,
    recorder: Option<VcrRecorder>,
}

impl NetStack {
    pub fn new(
        config: NetConfig,
        clock: Box<dyn Clock>,
        drivers: Vec<Box<dyn NetDriver>>,
    ) -> Result<Self, NetError> {
        let limit = config.max_clients_limit.max(1);
        let pool = SocketPool::new(config.pool_capacity(), config.max_clients.clamp(1, limit));
        let playback = config.playback.is_some();
        let recorder = match (&config.record, playback) {
            (Some(path), false) => Some(VcrRecorder::create(path)?),
            _ => None,
        };
        let listening = config.listen || config.dedicated;

        let mut ctx = NetContext {
            clock,
            time: 0.0,
            pool,
            message: SizeBuf::alloc(NET_MAXMESSAGE),
            host_cache: HostCache::new(),
            server: ServerStatus::new(&config.host_name),
            config,
        };
        ctx.set_net_time();

        let mut slots = Vec::with_capacity(drivers.len());
        for (level, mut driver) in drivers.into_iter().enumerate() {
            let initialized = driver.init(&mut ctx, level)?;
            if initialized && listening {
                driver.listen(&mut ctx, true)?;
            }
            if !initialized {
                log::debug!("{} driver not initialized", driver.name());
            }
            slots.push(DriverSlot {
                driver,
                initialized,
            });
        }

        Ok(Self {
            ctx,
            drivers: slots,
            scheduler: PollScheduler::new(),
            listening,
            playback,
            slist: SlistState::default(),
            stats: NetStats::default(),
            recorder,
        })
    }

    /// UDP on the host's network, or playback when the config names a
    /// recording.
    pub fn system(config: NetConfig) -> Result<Self, NetError> {
        let clock = Box::new(SystemClock::new());
        match config.playback.clone() {
            Some(path) => Self::playback(config, clock, &path),
            None => Self::new(config, clock, vec![Box::new(DatagramDriver::system())]),
        }
    }

    pub fn with_network(
        config: NetConfig,
        clock: Box<dyn Clock>,
        network: Box<dyn Network>,
    ) -> Result<Self, NetError> {
        Self::new(config, clock, vec![Box::new(DatagramDriver::new(network))])
    }

    pub fn playback(
        mut config: NetConfig,
        clock: Box<dyn Clock>,
        path: &Path,
    ) -> Result<Self, NetError> {
        let driver = VcrDriver::open(path)?;
        config.playback = Some(path.to_path_buf());
        Self::new(config, clock, vec![Box::new(driver)])
    }

    /// Driver level of a live socket.
    fn driver_for(&self, id: SocketId) -> Option<usize> {
        self.ctx
            .pool
            .get(id)
            .filter(|s| !s.disconnected)
            .map(|s| s.driver)
            .filter(|&level| level < self.drivers.len())
    }

    fn record(&mut self, record: VcrRecord) -> Result<(), NetError> {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.write(&record),
            None => Ok(()),
        }
    }

    pub fn listen(&mut self, state: bool) -> Result<(), NetError> {
        self.listening = state;
        for slot in self.drivers.iter_mut().filter(|s| s.initialized) {
            slot.driver.listen(&mut self.ctx, state)?;
        }
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn host_port(&self) -> u16 {
        self.ctx.config.host_port
    }

    /// Changes the port the server listens on, restarting the listener.
    pub fn set_port(&mut self, port: i64) -> Result<(), NetError> {
        if !(1..=65534).contains(&port) {
            return Err(NetError::InvalidPort(port));
        }
        let port = port as u16;
        self.ctx.config.host_port = port;
        for slot in self.drivers.iter_mut() {
            slot.driver.set_host_port(port);
        }
        if self.listening {
            self.listen(false)?;
            self.listen(true)?;
        }
        Ok(())
    }

    pub fn max_players(&self) -> usize {
        self.ctx.pool.max_clients()
    }

    /// Returns the value actually applied after clamping. Listening follows
    /// the player count: off for one player, on for more.
    pub fn set_max_players(&mut self, requested: i64) -> Result<usize, NetError> {
        if self.ctx.server.active {
            return Err(NetError::ServerActive);
        }
        let limit = self.ctx.config.max_clients_limit.max(1);
        let mut n = requested.max(1) as usize;
        if n > limit {
            n = limit;
            log::info!("maxplayers set to {}", n);
        }

        if n == 1 && self.listening {
            self.listen(false)?;
        }
        if n > 1 && !self.listening {
            self.listen(true)?;
        }
        self.ctx.pool.set_max_clients(n);
        self.ctx.config.max_clients = n;
        self.ctx
            .server
            .set_rule("deathmatch", if n > 1 { "1" } else { "0" });
        Ok(n)
    }

    /// Starts a server list request. Results arrive through `poll()`.
    pub fn slist(&mut self) {
        if self.slist.in_progress {
            return;
        }
        if !self.slist.silent {
            log::info!("Looking for Quake servers...");
            for line in SLIST_HEADER {
                log::info!("{}", line);
            }
        }

        let now = self.ctx.now();
        self.slist.in_progress = true;
        self.slist.start_time = now;
        self.slist.last_shown = 0;
        self.scheduler.schedule(PollTask::SlistSend, now);
        self.scheduler
            .schedule(PollTask::SlistPoll, now + SLIST_POLL_INTERVAL);
        self.ctx.host_cache.clear();
    }

    pub fn slist_in_progress(&self) -> bool {
        self.slist.in_progress
    }

    /// Runs every scheduled task that is due.
    pub fn poll(&mut self) -> Result<(), NetError> {
        let now = self.ctx.set_net_time();
        for task in self.scheduler.take_due(now) {
            match task {
                PollTask::SlistSend => self.slist_send()?,
                PollTask::SlistPoll => self.slist_poll()?,
                PollTask::Probe(kind, level) => self.poll_probe(kind, level),
            }
        }
        Ok(())
    }

    fn search_all(&mut self, xmit: bool) -> Result<(), NetError> {
        let ctx = &mut self.ctx;
        let result = self
            .drivers
            .iter_mut()
            .filter(|s| s.initialized)
            .try_for_each(|slot| slot.driver.search_for_hosts(ctx, xmit));
        if result.is_err() {
            self.scheduler.cancel(PollTask::SlistSend);
            self.scheduler.cancel(PollTask::SlistPoll);
            self.slist = SlistState::default();
        }
        result
    }

    fn slist_send(&mut self) -> Result<(), NetError> {
        self.search_all(true)?;
        let now = self.ctx.now();
        if now - self.slist.start_time < SLIST_SEND_WINDOW {
            self.scheduler
                .schedule(PollTask::SlistSend, now + SLIST_SEND_INTERVAL);
        }
        Ok(())
    }

    fn slist_poll(&mut self) -> Result<(), NetError> {
        self.search_all(false)?;
        if !self.slist.silent {
            self.print_slist();
        }

        let now = self.ctx.now();
        if now - self.slist.start_time < SLIST_DURATION {
            self.scheduler
                .schedule(PollTask::SlistPoll, now + SLIST_POLL_INTERVAL);
            return Ok(());
        }

        if !self.slist.silent {
            self.print_slist_trailer();
        }
        self.slist.in_progress = false;
        self.slist.silent = false;
        Ok(())
    }

    fn print_slist(&mut self) {
        for entry in &self.ctx.host_cache.entries()[self.slist.last_shown..] {
            log::info!("{}", entry.line());
        }
        self.slist.last_shown = self.ctx.host_cache.len();
    }

    fn print_slist_trailer(&self) {
        if self.ctx.host_cache.is_empty() {
            log::info!("No Quake servers found.");
        } else {
            log::info!("== end list ==");
        }
    }

    /// Connects to `host`, a host cache name, or the only server found
    /// when no host is given.
    pub fn connect(&mut self, host: Option<&str>) -> Result<SocketId, ConnectError> {
        self.ctx.set_net_time();
        let host = host.map(str::trim).filter(|h| !h.is_empty());

        let known = match host {
            Some(h) if h.eq_ignore_ascii_case("local") => Some(LOCAL_HOST.to_string()),
            Some(h) => self.ctx.host_cache.find_by_name(h).map(|e| e.cname.clone()),
            None => None,
        };

        let target = match known {
            Some(target) => target,
            None => {
                self.slist.silent = host.is_some();
                self.slist();
                while self.slist.in_progress {
                    self.poll()?;
                    self.ctx.clock.idle();
                }

                match host {
                    Some(h) => self
                        .ctx
                        .host_cache
                        .find_by_name(h)
                        .map_or_else(|| h.to_string(), |e| e.cname.clone()),
                    None => {
                        let [entry] = self.ctx.host_cache.entries() else {
                            return Err(ConnectError::NoServers);
                        };
                        log::info!("Connecting to...");
                        log::info!("{} @ {}", entry.name, entry.cname);
                        entry.cname.clone()
                    }
                }
            }
        };

        let mut last_error = ConnectError::NotInitialized;
        for slot in self.drivers.iter_mut().filter(|s| s.initialized) {
            match slot.driver.connect(&mut self.ctx, &target) {
                Ok(id) => return Ok(id),
                Err(ConnectError::Fatal(e)) => return Err(ConnectError::Fatal(e)),
                Err(e) => last_error = e,
            }
        }

        if !self.ctx.host_cache.is_empty() {
            for line in SLIST_HEADER {
                log::info!("{}", line);
            }
            self.slist.last_shown = 0;
            self.print_slist();
            self.print_slist_trailer();
        }
        Err(last_error)
    }

    /// Accepts at most one new connection from the first driver that has one.
    pub fn check_new_connections(&mut self) -> Result<Option<SocketId>, NetError> {
        let time = self.ctx.set_net_time();
        let mut found = None;
        if self.listening || self.playback {
            let ctx = &mut self.ctx;
            for slot in self.drivers.iter_mut().filter(|s| s.initialized) {
                if let Some(id) = slot.driver.check_new_connections(ctx)? {
                    found = Some(id);
                    break;
                }
            }
        }

        let address = found
            .and_then(|id| self.ctx.pool.get(id))
            .map(|s| s.address.clone())
            .unwrap_or_default();
        if found.is_some() {
            log::debug!("new connection from {}", address);
        }
        self.record(VcrRecord::Connect {
            time,
            session: found.map_or(0, |id| id.session()),
            address,
        })?;
        Ok(found)
    }

    /// On a delivered message its payload is in `message()` until the next
    /// call.
    pub fn get_message(&mut self, id: SocketId) -> Result<Received, NetError> {
        let Some(level) = self.driver_for(id) else {
            log::debug!("get_message: disconnected socket");
            return Ok(Received::Disconnected);
        };
        let time = self.ctx.set_net_time();
        let mut ret = self.drivers[level].driver.get_message(&mut self.ctx, id)?;

        if !self.playback {
            match ret {
                Received::Nothing => {
                    let timed_out = self.ctx.pool.get(id).is_some_and(|s| {
                        time - s.last_message_time > self.ctx.config.message_timeout
                    });
                    if timed_out {
                        let address = self.socket_address(id).unwrap_or_default();
                        log::info!("connection to {} timed out", address);
                        self.close(id);
                        ret = Received::Disconnected;
                    }
                }
                Received::Reliable | Received::Unreliable => {
                    if let Some(sock) = self.ctx.pool.get_mut(id) {
                        sock.last_message_time = time;
                    }
                }
                Received::Disconnected => {}
            }
        }
        match ret {
            Received::Reliable => self.stats.messages_received += 1,
            Received::Unreliable => self.stats.unreliable_messages_received += 1,
            _ => {}
        }

        let data = match ret {
            Received::Reliable | Received::Unreliable => self.ctx.message.data().to_vec(),
            _ => Vec::new(),
        };
        self.record(VcrRecord::GetMessage {
            time,
            session: id.session(),
            ret: ret.code(),
            data,
        })?;
        Ok(ret)
    }

    pub fn message(&self) -> &SizeBuf {
        &self.ctx.message
    }

    pub fn reader(&self) -> MsgReader<'_> {
        MsgReader::new(self.ctx.message.data())
    }

    pub fn send_message(&mut self, id: SocketId, data: &SizeBuf) -> Result<SendResult, NetError> {
        let Some(level) = self.driver_for(id) else {
            log::debug!("send_message: disconnected socket");
            return Ok(SendResult::Disconnected);
        };
        let time = self.ctx.set_net_time();
        let ret = self.drivers[level]
            .driver
            .send_message(&mut self.ctx, id, data.data())?;
        if ret == SendResult::Sent {
            self.stats.messages_sent += 1;
        }
        self.record(VcrRecord::SendMessage {
            time,
            session: id.session(),
            ret: ret.code(),
        })?;
        Ok(ret)
    }

    pub fn send_unreliable_message(
        &mut self,
        id: SocketId,
        data: &SizeBuf,
    ) -> Result<SendResult, NetError> {
        let Some(level) = self.driver_for(id) else {
            log::debug!("send_unreliable_message: disconnected socket");
            return Ok(SendResult::Disconnected);
        };
        let time = self.ctx.set_net_time();
        let ret = self.drivers[level]
            .driver
            .send_unreliable_message(&mut self.ctx, id, data.data())?;
        if ret == SendResult::Sent {
            self.stats.unreliable_messages_sent += 1;
        }
        self.record(VcrRecord::SendMessage {
            time,
            session: id.session(),
            ret: ret.code(),
        })?;
        Ok(ret)
    }

    /// `false` while a reliable message is still awaiting its ACKs.
    pub fn can_send_message(&mut self, id: SocketId) -> Result<bool, NetError> {
        let Some(level) = self.driver_for(id) else {
            return Ok(false);
        };
        let time = self.ctx.set_net_time();
        let ret = self.drivers[level].driver.can_send_message(&mut self.ctx, id)?;
        self.record(VcrRecord::CanSendMessage {
            time,
            session: id.session(),
            ret: i32::from(ret),
        })?;
        Ok(ret)
    }

    pub fn can_send_unreliable_message(&mut self, id: SocketId) -> bool {
        match self.driver_for(id) {
            Some(level) => self.drivers[level]
                .driver
                .can_send_unreliable_message(&mut self.ctx, id),
            None => false,
        }
    }

    /// Sends `data` reliably to every active socket, pumping the sockets
    /// until each message is acknowledged or `block_time` seconds pass.
    /// Returns how many sockets were still pending.
    pub fn send_to_all(&mut self, data: &SizeBuf, block_time: f64) -> Result<usize, NetError> {
        let mut pending: Vec<(SocketId, bool, bool)> = self
            .ctx
            .pool
            .active_ids()
            .into_iter()
            .map(|id| (id, false, false))
            .collect();
        let start = self.ctx.now();

        loop {
            let mut count = 0;
            for (id, sent, acked) in pending.iter_mut() {
                if self.ctx.pool.is_disconnected(*id) {
                    *sent = true;
                    *acked = true;
                    continue;
                }
                if !*sent {
                    if self.can_send_message(*id)? {
                        self.send_message(*id, data)?;
                        *sent = true;
                    } else {
                        self.get_message(*id)?;
                    }
                    count += 1;
                    continue;
                }
                if !*acked {
                    if self.can_send_message(*id)? {
                        *acked = true;
                    } else {
                        self.get_message(*id)?;
                    }
                    count += 1;
                }
            }

            if count == 0 || self.ctx.now() - start > block_time {
                return Ok(count);
            }
            self.ctx.clock.idle();
        }
    }

    pub fn close(&mut self, id: SocketId) {
        let Some(level) = self.driver_for(id) else {
            return;
        };
        self.ctx.set_net_time();
        self.drivers[level].driver.close(&mut self.ctx, id);
        self.ctx.pool.free_socket(id);
    }

    pub fn shutdown(&mut self) {
        self.ctx.set_net_time();
        for id in self.ctx.pool.active_ids() {
            self.close(id);
        }
        let ctx = &mut self.ctx;
        for slot in self.drivers.iter_mut().filter(|s| s.initialized) {
            slot.driver.shutdown(ctx);
            slot.initialized = false;
        }
        if let Some(mut recorder) = self.recorder.take() {
            if let Err(e) = recorder.flush() {
                log::warn!("unable to flush network recording: {}", e);
            }
            log::info!("closing network recording");
        }
    }

    /// Starts a player or rule query against `host`. Returns `false` when no
    /// driver could start it.
    pub fn start_probe(&mut self, kind: ProbeKind, host: &str) -> Result<bool, NetError> {
        self.ctx.set_net_time();
        let ctx = &mut self.ctx;
        let mut started = None;
        for (level, slot) in self.drivers.iter_mut().enumerate() {
            if !slot.initialized {
                continue;
            }
            if let Some(delay) = slot.driver.start_probe(ctx, kind, host)? {
                started = Some((level, delay));
                break;
            }
        }
        let Some((level, delay)) = started else {
            return Ok(false);
        };
        let at = self.ctx.now() + delay;
        self.scheduler.schedule(PollTask::Probe(kind, level), at);
        Ok(true)
    }

    fn poll_probe(&mut self, kind: ProbeKind, level: usize) {
        let Some(slot) = self.drivers.get_mut(level) else {
            return;
        };
        if let Some(delay) = slot.driver.poll_probe(&mut self.ctx, kind) {
            let at = self.ctx.now() + delay;
            self.scheduler.schedule(PollTask::Probe(kind, level), at);
        }
    }

    pub fn probe_in_progress(&self, kind: ProbeKind) -> bool {
        (0..self.drivers.len())
            .any(|level| self.scheduler.is_scheduled(PollTask::Probe(kind, level)))
    }

    pub fn probe(&self, kind: ProbeKind) -> Option<&ProbeReport> {
        self.drivers
            .iter()
            .filter(|s| s.initialized)
            .find_map(|s| s.driver.probe_report(kind))
    }

    #[cfg(feature = "ban")]
    pub fn set_ban(&mut self, ban: Option<BanFilter>) {
        for slot in self.drivers.iter_mut() {
            slot.driver.set_ban(ban);
        }
    }

    #[cfg(feature = "ban")]
    pub fn ban(&self) -> Option<BanFilter> {
        self.drivers.iter().find_map(|s| s.driver.ban())
    }

    pub fn net_time(&self) -> f64 {
        self.ctx.time
    }

    pub fn now(&self) -> f64 {
        self.ctx.now()
    }

    pub fn config(&self) -> &NetConfig {
        &self.ctx.config
    }

    pub fn is_playback(&self) -> bool {
        self.playback
    }

    pub fn socket_address(&self, id: SocketId) -> Option<String> {
        self.ctx.pool.get(id).map(|s| s.address.clone())
    }

    pub fn socket_peer_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.ctx.pool.get(id).map(|s| s.addr)
    }

    pub fn socket_connect_time(&self, id: SocketId) -> Option<f64> {
        self.ctx.pool.get(id).map(|s| s.connect_time)
    }

    pub fn is_disconnected(&self, id: SocketId) -> bool {
        self.ctx.pool.is_disconnected(id)
    }

    pub fn active_sockets(&self) -> Vec<SocketId> {
        self.ctx.pool.active_ids()
    }

    pub fn socket_stats(&self, id: SocketId) -> Option<SocketStats> {
        self.ctx.pool.get(id).map(|s| s.stats())
    }

    pub fn pool(&self) -> &SocketPool {
        &self.ctx.pool
    }

    pub fn server_status(&self) -> &ServerStatus {
        &self.ctx.server
    }

    pub fn server_status_mut(&mut self) -> &mut ServerStatus {
        &mut self.ctx.server
    }

    pub fn host_cache(&self) -> &HostCache {
        &self.ctx.host_cache
    }

    pub fn stats(&self) -> NetStats {
        self.stats
    }

    /// Packet counters summed over every driver.
    pub fn transport_stats(&self) -> TransportStats {
        self.drivers
            .iter()
            .filter_map(|s| s.driver.stats())
            .fold(TransportStats::default(), |mut total, s| {
                total.packets_sent += s.packets_sent;
                total.packets_resent += s.packets_resent;
                total.packets_received += s.packets_received;
                total.received_duplicate_count += s.received_duplicate_count;
                total.short_packet_count += s.short_packet_count;
                total.dropped_datagrams += s.dropped_datagrams;
                total
            })
    }

    /// Report for the `net_stats` command: counters with no argument, every
    /// active socket for `*`, or the socket with the given address.
    pub fn net_stats(&self, target: Option<&str>) -> Vec<String> {
        match target {
            None => {
                let mut lines = self.stats.lines();
                lines.extend(self.transport_stats().lines());
                lines
            }
            Some("*") => self
                .ctx
                .pool
                .active()
                .flat_map(|(_, s)| s.stats().lines())
                .collect(),
            Some(address) => self
                .ctx
                .pool
                .find_by_address(address)
                .map(|s| s.stats().lines())
                .unwrap_or_default(),
        }
    }
}
