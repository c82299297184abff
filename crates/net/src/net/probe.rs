use std::net::SocketAddr;

use crate::error::NetError;

use super::control::{ControlMessage, PlayerInfoReply};
use super::datagram::{DatagramDriver, send_control};
use super::driver::NetContext;
use super::protocol::{MAX_SCOREBOARD, NET_MAXMESSAGE};
use super::udp::UdpHandle;

/// Seconds between polls of a player query.
pub const PLAYER_PROBE_INTERVAL: f64 = 0.1;
pub const PLAYER_PROBE_POLLS: u32 = 20;
/// Seconds between polls of a rule query.
pub const RULE_PROBE_INTERVAL: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Players,
    Rules,
}

/// What a query against a remote server has gathered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub host: String,
    pub players: Vec<PlayerInfoReply>,
    pub rules: Vec<(String, String)>,
    pub finished: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ProbeState {
    pub(crate) socket: Option<UdpHandle>,
    polls_left: u32,
    pub(crate) report: ProbeReport,
}

impl ProbeState {
    pub(crate) fn in_progress(&self) -> bool {
        self.socket.is_some()
    }
}

fn player_lines(info: &PlayerInfoReply) -> [String; 3] {
    [
        info.name.clone(),
        format!(
            "  frags:{:3}  colors:{} {}  time:{}",
            info.frags,
            info.colors >> 4,
            info.colors & 0x0f,
            info.connect_time / 60
        ),
        format!("  {}", info.address),
    ]
}

impl DatagramDriver {
    fn probe_target(&self, ctx: &NetContext, host: &str) -> Option<(SocketAddr, usize)> {
        if let Some(entry) = ctx.host_cache.find_by_name(host) {
            if entry.driver == self.level {
                return Some((entry.addr, entry.max_users as usize));
            }
        }
        let addr = self.udp.as_ref()?.addr_from_name(host)?;
        Some((addr, MAX_SCOREBOARD))
    }

    pub(crate) fn begin_probe(
        &mut self,
        ctx: &mut NetContext,
        kind: ProbeKind,
        host: &str,
    ) -> Result<Option<f64>, NetError> {
        let in_progress = match kind {
            ProbeKind::Players => self.players_probe.in_progress(),
            ProbeKind::Rules => self.rules_probe.in_progress(),
        };
        if in_progress {
            return Ok(None);
        }
        let Some((target, max_players)) = self.probe_target(ctx, host) else {
            log::info!("Could not resolve {}", host);
            return Ok(None);
        };
        let Some(udp) = self.udp.as_mut() else {
            return Ok(None);
        };
        let handle = match udp.open_socket(0) {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("unable to open probe socket: {}", e);
                return Ok(None);
            }
        };

        let state = match kind {
            ProbeKind::Players => &mut self.players_probe,
            ProbeKind::Rules => &mut self.rules_probe,
        };
        state.socket = Some(handle);
        state.report = ProbeReport {
            host: host.to_string(),
            ..Default::default()
        };

        match kind {
            ProbeKind::Players => {
                state.polls_left = PLAYER_PROBE_POLLS;
                for player in 0..max_players.min(u8::MAX as usize) {
                    let request = ControlMessage::PlayerInfo {
                        player: player as u8,
                    };
                    send_control(udp, handle, target, &request)?;
                }
                Ok(Some(PLAYER_PROBE_INTERVAL))
            }
            ProbeKind::Rules => {
                let request = ControlMessage::RuleInfo {
                    previous: String::new(),
                };
                send_control(udp, handle, target, &request)?;
                Ok(Some(RULE_PROBE_INTERVAL))
            }
        }
    }

    fn finish_probe(&mut self, kind: ProbeKind, error: Option<String>) {
        let state = match kind {
            ProbeKind::Players => &mut self.players_probe,
            ProbeKind::Rules => &mut self.rules_probe,
        };
        if let (Some(udp), Some(handle)) = (self.udp.as_mut(), state.socket.take()) {
            udp.close_socket(handle);
        }
        state.report.finished = true;
        state.report.error = error;
    }

    pub(crate) fn poll_players_probe(&mut self) -> Option<f64> {
        let (udp, handle) = (self.udp.as_ref()?, self.players_probe.socket?);
        let mut buf = vec![0u8; NET_MAXMESSAGE];
        let mut error = None;

        while let Ok(Some((len, _))) = udp.read(handle, &mut buf) {
            match ControlMessage::decode(&buf[..len]) {
                Some(ControlMessage::PlayerInfoReply(info)) => {
                    for line in player_lines(&info) {
                        log::info!("{}", line);
                    }
                    self.players_probe.report.players.push(info);
                }
                Some(_) => {
                    error = Some("Unexpected response to Player Info request".to_string());
                    break;
                }
                None => break,
            }
        }

        if let Some(error) = error {
            log::warn!("{}", error);
            self.finish_probe(ProbeKind::Players, Some(error));
            return None;
        }

        self.players_probe.polls_left = self.players_probe.polls_left.saturating_sub(1);
        if self.players_probe.polls_left > 0 {
            return Some(PLAYER_PROBE_INTERVAL);
        }
        self.finish_probe(ProbeKind::Players, None);
        None
    }

    /// Each reply names the rule to ask for next; an empty reply ends the walk.
    pub(crate) fn poll_rules_probe(&mut self) -> Option<f64> {
        let (udp, handle) = (self.udp.as_ref()?, self.rules_probe.socket?);
        let mut buf = vec![0u8; NET_MAXMESSAGE];

        let (len, from) = match udp.read(handle, &mut buf) {
            Ok(Some((len, from))) if len > 0 => (len, from),
            _ => return Some(RULE_PROBE_INTERVAL),
        };

        match ControlMessage::decode(&buf[..len]) {
            Some(ControlMessage::RuleInfoReply {
                rule: Some((name, value)),
            }) => {
                log::info!("{:<16.16}  {:<16.16}", name, value);
                let request = ControlMessage::RuleInfo {
                    previous: name.clone(),
                };
                self.rules_probe.report.rules.push((name, value));
                if let Err(e) = send_control(udp, handle, from, &request) {
                    log::warn!("rule request failed: {}", e);
                    self.finish_probe(ProbeKind::Rules, Some(e.to_string()));
                    return None;
                }
                Some(RULE_PROBE_INTERVAL)
            }
            Some(ControlMessage::RuleInfoReply { rule: None }) => {
                self.finish_probe(ProbeKind::Rules, None);
                None
            }
            _ => {
                let error = "Unexpected response to Rule Info request".to_string();
                log::warn!("{}", error);
                self.finish_probe(ProbeKind::Rules, Some(error));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_lines_split_colors_and_minutes() {
        let info = PlayerInfoReply {
            player: 0,
            name: "ranger".to_string(),
            colors: 0x4d,
            frags: 7,
            connect_time: 185,
            address: "10.0.0.2:26001".to_string(),
        };
        let lines = player_lines(&info);
        assert_eq!(lines[0], "ranger");
        assert_eq!(lines[1], "  frags:  7  colors:4 13  time:3");
        assert_eq!(lines[2], "  10.0.0.2:26001");
    }
}
