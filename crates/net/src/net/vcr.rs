use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::error::{ConnectError, NetError};

use super::driver::{NetContext, NetDriver, Received, SendResult};
use super::socket::SocketId;

/// One observed dispatch call. `session` is 0 when no socket was involved.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum VcrRecord {
    Connect {
        time: f64,
        session: u64,
        address: String,
    },
    GetMessage {
        time: f64,
        session: u64,
        ret: i32,
        data: Vec<u8>,
    },
    SendMessage {
        time: f64,
        session: u64,
        ret: i32,
    },
    CanSendMessage {
        time: f64,
        session: u64,
        ret: i32,
    },
}

impl VcrRecord {
    pub fn session(&self) -> u64 {
        match self {
            VcrRecord::Connect { session, .. }
            | VcrRecord::GetMessage { session, .. }
            | VcrRecord::SendMessage { session, .. }
            | VcrRecord::CanSendMessage { session, .. } => *session,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, NetError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(|e| NetError::VcrRecord(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, NetError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(|e| NetError::VcrRecord(e.to_string()))
    }
}

/// Appends length-prefixed records to a stream.
pub struct VcrRecorder {
    writer: Box<dyn Write + Send>,
}

impl VcrRecorder {
    pub fn create(path: &Path) -> Result<Self, NetError> {
        let file = File::create(path)?;
        log::info!("recording network traffic to {}", path.display());
        Ok(Self::from_writer(Box::new(BufWriter::new(file))))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, record: &VcrRecord) -> Result<(), NetError> {
        let bytes = record.serialize()?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NetError> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn read_records(mut reader: impl Read) -> Result<Vec<VcrRecord>, NetError> {
    let mut records = Vec::new();
    let mut prefix = [0u8; 4];
    loop {
        match reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut bytes = vec![0u8; u32::from_le_bytes(prefix) as usize];
        reader.read_exact(&mut bytes)?;
        records.push(VcrRecord::deserialize(&bytes)?);
    }
    Ok(records)
}

/// Answers dispatch calls from a recording, in the order they were made.
pub struct VcrDriver {
    records: VecDeque<VcrRecord>,
    sessions: HashMap<SocketId, u64>,
    level: usize,
}

impl VcrDriver {
    pub fn new(records: Vec<VcrRecord>) -> Self {
        Self {
            records: records.into(),
            sessions: HashMap::new(),
            level: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self, NetError> {
        let records = read_records(BufReader::new(File::open(path)?))?;
        log::info!("playing back {} records from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    fn session_of(&self, id: SocketId) -> u64 {
        self.sessions.get(&id).copied().unwrap_or(0)
    }

    /// Next record, which must be the expected call for `session`.
    fn next_ret(&mut self, id: SocketId, expected: &'static str) -> Result<VcrRecord, NetError> {
        let session = self.session_of(id);
        let record = self
            .records
            .pop_front()
            .ok_or(NetError::VcrMismatch { expected })?;
        let kind_matches = matches!(
            (&record, expected),
            (VcrRecord::GetMessage { .. }, "GetMessage")
                | (VcrRecord::SendMessage { .. }, "SendMessage")
                | (VcrRecord::CanSendMessage { .. }, "CanSendMessage")
        );
        if !kind_matches || record.session() != session {
            log::warn!("VCR mismatch: expected {} for session {}, got {:?}", expected, session, record);
            return Err(NetError::VcrMismatch { expected });
        }
        Ok(record)
    }

    fn send_result(&mut self, id: SocketId) -> Result<SendResult, NetError> {
        match self.next_ret(id, "SendMessage")? {
            VcrRecord::SendMessage { ret, .. } => Ok(SendResult::from_code(ret)),
            _ => Err(NetError::VcrMismatch {
                expected: "SendMessage",
            }),
        }
    }
}

impl NetDriver for VcrDriver {
    fn name(&self) -> &'static str {
        "VCR"
    }

    fn init(&mut self, _ctx: &mut NetContext, level: usize) -> Result<bool, NetError> {
        self.level = level;
        Ok(true)
    }

    fn listen(&mut self, _ctx: &mut NetContext, _state: bool) -> Result<(), NetError> {
        Ok(())
    }

    fn search_for_hosts(&mut self, _ctx: &mut NetContext, _xmit: bool) -> Result<(), NetError> {
        Ok(())
    }

    fn connect(&mut self, _ctx: &mut NetContext, _host: &str) -> Result<SocketId, ConnectError> {
        Err(ConnectError::NotInitialized)
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut NetContext,
    ) -> Result<Option<SocketId>, NetError> {
        let expected = "Connect";
        let Some(VcrRecord::Connect {
            session, address, ..
        }) = self.records.pop_front()
        else {
            return Err(NetError::VcrMismatch { expected });
        };
        if session == 0 {
            return Ok(None);
        }
        let id = ctx
            .pool
            .new_socket(self.level, ctx.time)
            .ok_or(NetError::VcrMismatch { expected })?;
        if let Some(sock) = ctx.pool.get_mut(id) {
            sock.address = address;
        }
        self.sessions.insert(id, session);
        Ok(Some(id))
    }

    fn get_message(&mut self, ctx: &mut NetContext, id: SocketId) -> Result<Received, NetError> {
        match self.next_ret(id, "GetMessage")? {
            VcrRecord::GetMessage { ret, data, .. } => {
                let received = Received::from_code(ret);
                if matches!(received, Received::Reliable | Received::Unreliable) {
                    ctx.message.replace(&data);
                }
                Ok(received)
            }
            _ => Err(NetError::VcrMismatch {
                expected: "GetMessage",
            }),
        }
    }

    fn send_message(
        &mut self,
        _ctx: &mut NetContext,
        id: SocketId,
        _data: &[u8],
    ) -> Result<SendResult, NetError> {
        self.send_result(id)
    }

    fn send_unreliable_message(
        &mut self,
        _ctx: &mut NetContext,
        id: SocketId,
        _data: &[u8],
    ) -> Result<SendResult, NetError> {
        self.send_result(id)
    }

    fn can_send_message(&mut self, _ctx: &mut NetContext, id: SocketId) -> Result<bool, NetError> {
        match self.next_ret(id, "CanSendMessage")? {
            VcrRecord::CanSendMessage { ret, .. } => Ok(ret != 0),
            _ => Err(NetError::VcrMismatch {
                expected: "CanSendMessage",
            }),
        }
    }

    fn close(&mut self, _ctx: &mut NetContext, id: SocketId) {
        self.sessions.remove(&id);
    }

    fn shutdown(&mut self, _ctx: &mut NetContext) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_survive_framing() {
        let records = vec![
            VcrRecord::Connect {
                time: 1.5,
                session: 7,
                address: "10.0.0.2:50000".to_string(),
            },
            VcrRecord::GetMessage {
                time: 1.6,
                session: 7,
                ret: 1,
                data: b"hello".to_vec(),
            },
            VcrRecord::CanSendMessage {
                time: 1.7,
                session: 7,
                ret: 0,
            },
        ];

        let mut stream = Vec::new();
        for record in &records {
            let bytes = record.serialize().unwrap();
            stream.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            stream.extend_from_slice(&bytes);
        }

        assert_eq!(read_records(stream.as_slice()).unwrap(), records);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let bytes = VcrRecord::SendMessage {
            time: 0.0,
            session: 1,
            ret: 1,
        }
        .serialize()
        .unwrap();
        let mut stream = (bytes.len() as u32).to_le_bytes().to_vec();
        stream.extend_from_slice(&bytes[..bytes.len() / 2]);
        assert!(read_records(stream.as_slice()).is_err());
    }
}
