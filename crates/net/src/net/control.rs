use crate::msg::MsgReader;
use crate::net::protocol::{CONTROL_HEADER_SIZE, ControlCode, control_word, is_valid_control};
use crate::sizebuf::{SizeBuf, SizeBufError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfoReply {
    pub address: String,
    pub host_name: String,
    pub level_name: String,
    pub current_players: u8,
    pub max_players: u8,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfoReply {
    pub player: u8,
    pub name: String,
    pub colors: i32,
    pub frags: i32,
    pub connect_time: i32,
    pub address: String,
}

/// Out-of-band frames exchanged before (or outside) a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Connect { game: String, version: u8 },
    ServerInfo { game: String, version: u8 },
    PlayerInfo { player: u8 },
    RuleInfo { previous: String },
    Accept { port: i32 },
    Reject { reason: String },
    ServerInfoReply(ServerInfoReply),
    PlayerInfoReply(PlayerInfoReply),
    /// `None` marks the end of the rule list.
    RuleInfoReply { rule: Option<(String, String)> },
}

impl ControlMessage {
    pub fn code(&self) -> ControlCode {
        match self {
            ControlMessage::Connect { .. } => ControlCode::Connect,
            ControlMessage::ServerInfo { .. } => ControlCode::ServerInfo,
            ControlMessage::PlayerInfo { .. } => ControlCode::PlayerInfo,
            ControlMessage::RuleInfo { .. } => ControlCode::RuleInfo,
            ControlMessage::Accept { .. } => ControlCode::Accept,
            ControlMessage::Reject { .. } => ControlCode::Reject,
            ControlMessage::ServerInfoReply(_) => ControlCode::ServerInfoReply,
            ControlMessage::PlayerInfoReply(_) => ControlCode::PlayerInfoReply,
            ControlMessage::RuleInfoReply { .. } => ControlCode::RuleInfoReply,
        }
    }

    /// Writes the complete datagram, control word included, into `buf`.
    pub fn encode(&self, buf: &mut SizeBuf) -> Result<(), SizeBufError> {
        buf.clear();
        buf.write(&[0; CONTROL_HEADER_SIZE])?;
        buf.write_byte(self.code().as_byte() as i32)?;
        match self {
            ControlMessage::Connect { game, version }
            | ControlMessage::ServerInfo { game, version } => {
                buf.write_string(game)?;
                buf.write_byte(*version as i32)?;
            }
            ControlMessage::PlayerInfo { player } => buf.write_byte(*player as i32)?,
            ControlMessage::RuleInfo { previous } => buf.write_string(previous)?,
            ControlMessage::Accept { port } => buf.write_long(*port)?,
            ControlMessage::Reject { reason } => buf.write_string(reason)?,
            ControlMessage::ServerInfoReply(info) => {
                buf.write_string(&info.address)?;
                buf.write_string(&info.host_name)?;
                buf.write_string(&info.level_name)?;
                buf.write_byte(info.current_players as i32)?;
                buf.write_byte(info.max_players as i32)?;
                buf.write_byte(info.protocol_version as i32)?;
            }
            ControlMessage::PlayerInfoReply(info) => {
                buf.write_byte(info.player as i32)?;
                buf.write_string(&info.name)?;
                buf.write_long(info.colors)?;
                buf.write_long(info.frags)?;
                buf.write_long(info.connect_time)?;
                buf.write_string(&info.address)?;
            }
            ControlMessage::RuleInfoReply { rule } => {
                if let Some((name, value)) = rule {
                    buf.write_string(name)?;
                    buf.write_string(value)?;
                }
            }
        }
        let word = control_word(buf.len());
        buf.space_mut()[..CONTROL_HEADER_SIZE].copy_from_slice(&word);
        Ok(())
    }

    /// Returns `None` for anything that is not a well-formed control frame.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if !is_valid_control(datagram) {
            return None;
        }
        let mut msg = MsgReader::new(&datagram[CONTROL_HEADER_SIZE..]);
        let code = ControlCode::from_byte(msg.read_byte())?;

        let message = match code {
            ControlCode::Connect => ControlMessage::Connect {
                game: msg.read_string(),
                version: msg.read_byte() as u8,
            },
            ControlCode::ServerInfo => ControlMessage::ServerInfo {
                game: msg.read_string(),
                version: msg.read_byte() as u8,
            },
            ControlCode::PlayerInfo => ControlMessage::PlayerInfo {
                player: msg.read_byte() as u8,
            },
            ControlCode::RuleInfo => ControlMessage::RuleInfo {
                previous: msg.read_string(),
            },
            ControlCode::Accept => ControlMessage::Accept {
                port: msg.read_long(),
            },
            ControlCode::Reject => ControlMessage::Reject {
                reason: msg.read_string(),
            },
            ControlCode::ServerInfoReply => ControlMessage::ServerInfoReply(ServerInfoReply {
                address: msg.read_string(),
                host_name: msg.read_string(),
                level_name: msg.read_string(),
                current_players: msg.read_byte() as u8,
                max_players: msg.read_byte() as u8,
                protocol_version: msg.read_byte() as u8,
            }),
            ControlCode::PlayerInfoReply => ControlMessage::PlayerInfoReply(PlayerInfoReply {
                player: msg.read_byte() as u8,
                name: msg.read_string(),
                colors: msg.read_long(),
                frags: msg.read_long(),
                connect_time: msg.read_long(),
                address: msg.read_string(),
            }),
            ControlCode::RuleInfoReply => {
                if msg.remaining() == 0 {
                    ControlMessage::RuleInfoReply { rule: None }
                } else {
                    let name = msg.read_string();
                    let value = msg.read_string();
                    let rule = if name.is_empty() {
                        None
                    } else {
                        Some((name, value))
                    };
                    ControlMessage::RuleInfoReply { rule }
                }
            }
        };

        if msg.bad_read() {
            return None;
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{GAME_NAME, NET_PROTOCOL_VERSION};

    fn encoded(message: &ControlMessage) -> Vec<u8> {
        let mut buf = SizeBuf::alloc(1024);
        message.encode(&mut buf).unwrap();
        buf.data().to_vec()
    }

    #[test]
    fn test_connect_request_layout() {
        let bytes = encoded(&ControlMessage::Connect {
            game: GAME_NAME.to_string(),
            version: NET_PROTOCOL_VERSION,
        });
        assert_eq!(
            bytes,
            [0x80, 0x00, 0x00, 0x0c, 0x01, b'Q', b'U', b'A', b'K', b'E', 0, 3]
        );
    }

    #[test]
    fn test_accept_port_is_little_endian_long() {
        let bytes = encoded(&ControlMessage::Accept { port: 26001 });
        assert_eq!(&bytes[4..], &[0x81, 0x91, 0x65, 0x00, 0x00]);
        assert_eq!(
            ControlMessage::decode(&bytes),
            Some(ControlMessage::Accept { port: 26001 })
        );
    }

    #[test]
    fn test_server_info_reply_decodes() {
        let reply = ControlMessage::ServerInfoReply(ServerInfoReply {
            address: "10.0.0.1:26000".to_string(),
            host_name: "frag fest".to_string(),
            level_name: "e1m1".to_string(),
            current_players: 3,
            max_players: 8,
            protocol_version: NET_PROTOCOL_VERSION,
        });
        assert_eq!(ControlMessage::decode(&encoded(&reply)), Some(reply));
    }

    #[test]
    fn test_empty_rule_reply_ends_list() {
        let bytes = encoded(&ControlMessage::RuleInfoReply { rule: None });
        assert_eq!(bytes.len(), 5);
        assert_eq!(
            ControlMessage::decode(&bytes),
            Some(ControlMessage::RuleInfoReply { rule: None })
        );
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let bytes = encoded(&ControlMessage::PlayerInfoReply(PlayerInfoReply {
            player: 0,
            name: "ranger".to_string(),
            colors: 0,
            frags: 5,
            connect_time: 60,
            address: "10.0.0.2:26001".to_string(),
        }));
        let mut truncated = bytes[..bytes.len() - 20].to_vec();
        let word = control_word(truncated.len());
        truncated[..4].copy_from_slice(&word);
        assert_eq!(ControlMessage::decode(&truncated), None);
    }

    #[test]
    fn test_non_control_and_unknown_codes_are_rejected() {
        assert_eq!(ControlMessage::decode(&[0x00, 0x01, 0x00, 0x05, 0x01]), None);
        assert_eq!(ControlMessage::decode(&[0x80, 0x00, 0x00, 0x05, 0x42]), None);
    }
}
