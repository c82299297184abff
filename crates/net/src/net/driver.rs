use crate::config::NetConfig;
use crate::error::{ConnectError, NetError};
use crate::sizebuf::SizeBuf;
use crate::stats::TransportStats;
use crate::time::Clock;

use super::hostcache::HostCache;
use super::probe::{ProbeKind, ProbeReport};
use super::socket::{SocketId, SocketPool};
use super::status::ServerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Nothing,
    Reliable,
    Unreliable,
    Disconnected,
}

impl Received {
    pub fn code(&self) -> i32 {
        match self {
            Received::Nothing => 0,
            Received::Reliable => 1,
            Received::Unreliable => 2,
            Received::Disconnected => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Received::Reliable,
            2 => Received::Unreliable,
            0 => Received::Nothing,
            _ => Received::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// Nothing was sent yet; try again later.
    Deferred,
    Disconnected,
}

impl SendResult {
    pub fn code(&self) -> i32 {
        match self {
            SendResult::Sent => 1,
            SendResult::Deferred => 0,
            SendResult::Disconnected => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SendResult::Sent,
            0 => SendResult::Deferred,
            _ => SendResult::Disconnected,
        }
    }
}

/// State shared by the dispatch layer and every driver.
pub struct NetContext {
    pub(crate) clock: Box<dyn Clock>,
    /// Network time of the current call.
    pub(crate) time: f64,
    pub(crate) pool: SocketPool,
    /// The current inbound message.
    pub(crate) message: SizeBuf,
    pub(crate) host_cache: HostCache,
    pub(crate) server: ServerStatus,
    pub(crate) config: NetConfig,
}

impl NetContext {
    pub fn set_net_time(&mut self) -> f64 {
        self.time = self.clock.now();
        self.time
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}

pub trait NetDriver: Send {
    fn name(&self) -> &'static str;

    /// `Ok(false)` leaves the driver present but unused.
    fn init(&mut self, ctx: &mut NetContext, level: usize) -> Result<bool, NetError>;

    fn listen(&mut self, ctx: &mut NetContext, state: bool) -> Result<(), NetError>;

    fn set_host_port(&mut self, _port: u16) {}

    fn search_for_hosts(&mut self, ctx: &mut NetContext, xmit: bool) -> Result<(), NetError>;

    fn connect(&mut self, ctx: &mut NetContext, host: &str) -> Result<SocketId, ConnectError>;

    fn check_new_connections(&mut self, ctx: &mut NetContext)
    -> Result<Option<SocketId>, NetError>;

    /// A delivered message is left in `ctx.message`.
    fn get_message(&mut self, ctx: &mut NetContext, sock: SocketId) -> Result<Received, NetError>;

    fn send_message(
        &mut self,
        ctx: &mut NetContext,
        sock: SocketId,
        data: &[u8],
    ) -> Result<SendResult, NetError>;

    fn send_unreliable_message(
        &mut self,
        ctx: &mut NetContext,
        sock: SocketId,
        data: &[u8],
    ) -> Result<SendResult, NetError>;

    fn can_send_message(&mut self, ctx: &mut NetContext, sock: SocketId)
    -> Result<bool, NetError>;

    fn can_send_unreliable_message(&mut self, _ctx: &mut NetContext, _sock: SocketId) -> bool {
        true
    }

    /// Releases driver resources; the caller frees the pool slot.
    fn close(&mut self, ctx: &mut NetContext, sock: SocketId);

    fn shutdown(&mut self, ctx: &mut NetContext);

    fn stats(&self) -> Option<TransportStats> {
        None
    }

    /// Starts a player or rule query; returns the delay before the first poll.
    fn start_probe(
        &mut self,
        _ctx: &mut NetContext,
        _kind: ProbeKind,
        _host: &str,
    ) -> Result<Option<f64>, NetError> {
        Ok(None)
    }

    /// Returns the delay before the next poll, or `None` once finished.
    fn poll_probe(&mut self, _ctx: &mut NetContext, _kind: ProbeKind) -> Option<f64> {
        None
    }

    fn probe_report(&self, _kind: ProbeKind) -> Option<&ProbeReport> {
        None
    }

    #[cfg(feature = "ban")]
    fn set_ban(&mut self, _ban: Option<super::datagram::BanFilter>) {}

    #[cfg(feature = "ban")]
    fn ban(&self) -> Option<super::datagram::BanFilter> {
        None
    }
}

