use bitflags::bitflags;

pub const NET_MAXMESSAGE: usize = 8192;
pub const MAX_DATAGRAM: usize = 1024;
pub const NET_HEADERSIZE: usize = 8;
pub const NET_DATAGRAMSIZE: usize = MAX_DATAGRAM + NET_HEADERSIZE;
pub const NET_NAMELEN: usize = 64;
pub const NET_PROTOCOL_VERSION: u8 = 3;
pub const GAME_NAME: &str = "QUAKE";
pub const DEFAULT_PORT: u16 = 26000;
pub const HOST_CACHE_SIZE: usize = 8;
pub const MAX_SCOREBOARD: usize = 16;

pub const LENGTH_MASK: u32 = 0x0000_ffff;
pub const CONTROL_HEADER_SIZE: usize = 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u32 {
        const DATA = 0x0001_0000;
        const ACK = 0x0002_0000;
        const NAK = 0x0004_0000;
        const EOM = 0x0008_0000;
        const UNRELIABLE = 0x0010_0000;
        const CTL = 0x8000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    /// Whole datagram length, header included.
    pub length: usize,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, payload_len: usize, sequence: u32) -> Self {
        Self {
            flags,
            length: payload_len + NET_HEADERSIZE,
            sequence,
        }
    }

    pub fn encode(&self) -> [u8; NET_HEADERSIZE] {
        let word = self.flags.bits() | (self.length as u32 & LENGTH_MASK);
        let mut out = [0u8; NET_HEADERSIZE];
        out[..4].copy_from_slice(&word.to_be_bytes());
        out[4..].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < NET_HEADERSIZE {
            return None;
        }
        let word = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let sequence = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        Some(Self {
            flags: PacketFlags::from_bits_retain(word & !LENGTH_MASK),
            length: (word & LENGTH_MASK) as usize,
            sequence,
        })
    }

    pub fn payload_len(&self) -> usize {
        self.length.saturating_sub(NET_HEADERSIZE)
    }
}

/// Builds a complete sequenced packet.
pub fn packet(flags: PacketFlags, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(flags, payload.len(), sequence);
    let mut out = Vec::with_capacity(header.length);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

pub fn control_word(length: usize) -> [u8; CONTROL_HEADER_SIZE] {
    (PacketFlags::CTL.bits() | (length as u32 & LENGTH_MASK)).to_be_bytes()
}

/// A control datagram must carry exactly the CTL flag and its own length.
pub fn is_valid_control(data: &[u8]) -> bool {
    if data.len() < CONTROL_HEADER_SIZE {
        return false;
    }
    let word = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if word == u32::MAX {
        return false;
    }
    if word & !LENGTH_MASK != PacketFlags::CTL.bits() {
        return false;
    }
    (word & LENGTH_MASK) as usize == data.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Connect,
    ServerInfo,
    PlayerInfo,
    RuleInfo,
    Accept,
    Reject,
    ServerInfoReply,
    PlayerInfoReply,
    RuleInfoReply,
}

impl ControlCode {
    pub fn as_byte(&self) -> u8 {
        match self {
            ControlCode::Connect => 0x01,
            ControlCode::ServerInfo => 0x02,
            ControlCode::PlayerInfo => 0x03,
            ControlCode::RuleInfo => 0x04,
            ControlCode::Accept => 0x81,
            ControlCode::Reject => 0x82,
            ControlCode::ServerInfoReply => 0x83,
            ControlCode::PlayerInfoReply => 0x84,
            ControlCode::RuleInfoReply => 0x85,
        }
    }

    pub fn from_byte(byte: i32) -> Option<Self> {
        match byte {
            0x01 => Some(ControlCode::Connect),
            0x02 => Some(ControlCode::ServerInfo),
            0x03 => Some(ControlCode::PlayerInfo),
            0x04 => Some(ControlCode::RuleInfo),
            0x81 => Some(ControlCode::Accept),
            0x82 => Some(ControlCode::Reject),
            0x83 => Some(ControlCode::ServerInfoReply),
            0x84 => Some(ControlCode::PlayerInfoReply),
            0x85 => Some(ControlCode::RuleInfoReply),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        let header = PacketHeader::new(PacketFlags::DATA | PacketFlags::EOM, 4, 7);
        assert_eq!(header.encode(), [0x00, 0x09, 0x00, 0x0c, 0, 0, 0, 7]);
    }

    #[test]
    fn test_header_decode() {
        let bytes = packet(PacketFlags::UNRELIABLE, 0x0102_0304, &[1, 2, 3]);
        let header = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(header.flags, PacketFlags::UNRELIABLE);
        assert_eq!(header.length, 11);
        assert_eq!(header.payload_len(), 3);
        assert_eq!(header.sequence, 0x0102_0304);
        assert!(PacketHeader::decode(&bytes[..7]).is_none());
    }

    #[test]
    fn test_ack_has_no_payload() {
        let bytes = packet(PacketFlags::ACK, 3, &[]);
        assert_eq!(bytes.len(), NET_HEADERSIZE);
        assert_eq!(PacketHeader::decode(&bytes).unwrap().length, NET_HEADERSIZE);
    }

    #[test]
    fn test_control_validation() {
        let mut datagram = control_word(6).to_vec();
        datagram.extend_from_slice(&[0x02, 0]);
        assert!(is_valid_control(&datagram));

        // length mismatch
        datagram.push(0);
        assert!(!is_valid_control(&datagram));

        // extra flags
        let mut flagged = (PacketFlags::CTL | PacketFlags::ACK).bits() | 5;
        let mut bytes = flagged.to_be_bytes().to_vec();
        bytes.push(0);
        assert!(!is_valid_control(&bytes));

        flagged = u32::MAX;
        assert!(!is_valid_control(&flagged.to_be_bytes()));
        assert!(!is_valid_control(&[0x80, 0]));
    }

    #[test]
    fn test_control_codes() {
        assert_eq!(ControlCode::from_byte(0x81), Some(ControlCode::Accept));
        assert_eq!(ControlCode::RuleInfoReply.as_byte(), 0x85);
        assert_eq!(ControlCode::from_byte(0x05), None);
        assert_eq!(ControlCode::from_byte(-1), None);
    }
}
