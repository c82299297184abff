use glam::Vec3;

use crate::sizebuf::{SizeBuf, SizeBufError};

pub const MAX_MSG_STRING: usize = 2048;

impl SizeBuf {
    pub fn write_char(&mut self, c: i32) -> Result<(), SizeBufError> {
        debug_assert!((-128..=127).contains(&c), "MSG_WriteChar: range error");
        self.write(&[c as i8 as u8])
    }

    pub fn write_byte(&mut self, c: i32) -> Result<(), SizeBufError> {
        debug_assert!((0..=255).contains(&c), "MSG_WriteByte: range error");
        self.write(&[c as u8])
    }

    pub fn write_short(&mut self, c: i32) -> Result<(), SizeBufError> {
        debug_assert!(
            (i16::MIN as i32..=i16::MAX as i32).contains(&c),
            "MSG_WriteShort: range error"
        );
        self.write(&(c as i16).to_le_bytes())
    }

    pub fn write_long(&mut self, c: i32) -> Result<(), SizeBufError> {
        self.write(&c.to_le_bytes())
    }

    pub fn write_float(&mut self, f: f32) -> Result<(), SizeBufError> {
        self.write(&f.to_le_bytes())
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), SizeBufError> {
        self.write(s.as_bytes())?;
        self.write(&[0])
    }

    pub fn write_coord(&mut self, f: f32) -> Result<(), SizeBufError> {
        self.write(&((f * 8.0) as i32 as i16).to_le_bytes())
    }

    pub fn write_angle(&mut self, f: f32) -> Result<(), SizeBufError> {
        let angle = ((f as i32) * 256 / 360) & 255;
        self.write(&[angle as u8])
    }

    pub fn write_vec3(&mut self, v: Vec3) -> Result<(), SizeBufError> {
        self.write_coord(v.x)?;
        self.write_coord(v.y)?;
        self.write_coord(v.z)
    }
}

/// Read cursor over one inbound message. Every read past the end yields the
/// `-1` sentinel and latches `bad_read`.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    read_count: usize,
    bad_read: bool,
}

impl<'a> MsgReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            read_count: 0,
            bad_read: false,
        }
    }

    pub fn begin_reading(&mut self) {
        self.read_count = 0;
        self.bad_read = false;
    }

    pub fn bad_read(&self) -> bool {
        self.bad_read
    }

    pub fn position(&self) -> usize {
        self.read_count
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_count)
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.read_count + N;
        if end > self.data.len() {
            self.bad_read = true;
            return None;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.read_count..end]);
        self.read_count = end;
        Some(bytes)
    }

    pub fn read_char(&mut self) -> i32 {
        self.take::<1>().map_or(-1, |b| b[0] as i8 as i32)
    }

    pub fn read_byte(&mut self) -> i32 {
        self.take::<1>().map_or(-1, |b| b[0] as i32)
    }

    pub fn read_short(&mut self) -> i32 {
        self.take::<2>().map_or(-1, |b| i16::from_le_bytes(b) as i32)
    }

    pub fn read_long(&mut self) -> i32 {
        self.take::<4>().map_or(-1, i32::from_le_bytes)
    }

    pub fn read_float(&mut self) -> f32 {
        self.take::<4>().map_or(-1.0, f32::from_le_bytes)
    }

    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        while bytes.len() < MAX_MSG_STRING - 1 {
            let c = self.read_char();
            if c == -1 || c == 0 {
                break;
            }
            bytes.push(c as u8);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn read_coord(&mut self) -> f32 {
        self.read_short() as f32 * (1.0 / 8.0)
    }

    pub fn read_angle(&mut self) -> f32 {
        self.read_char() as f32 * (360.0 / 256.0)
    }

    pub fn read_vec3(&mut self) -> Vec3 {
        let x = self.read_coord();
        let y = self.read_coord();
        let z = self.read_coord();
        Vec3::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_little_endian() {
        let mut buf = SizeBuf::alloc(256);
        buf.write_short(0x1234).unwrap();
        buf.write_long(0x0102_0304).unwrap();
        buf.write_char(-2).unwrap();
        assert_eq!(buf.data(), &[0x34, 0x12, 0x04, 0x03, 0x02, 0x01, 0xfe]);
    }

    #[test]
    fn test_read_back_mixed_message() {
        let mut buf = SizeBuf::alloc(256);
        buf.write_byte(200).unwrap();
        buf.write_short(-300).unwrap();
        buf.write_long(-70000).unwrap();
        buf.write_float(1.5).unwrap();
        buf.write_string("QUAKE").unwrap();
        buf.write_string("").unwrap();

        let mut reader = MsgReader::new(buf.data());
        assert_eq!(reader.read_byte(), 200);
        assert_eq!(reader.read_short(), -300);
        assert_eq!(reader.read_long(), -70000);
        assert_eq!(reader.read_float(), 1.5);
        assert_eq!(reader.read_string(), "QUAKE");
        assert_eq!(reader.read_string(), "");
        assert!(!reader.bad_read());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_sets_bad_read() {
        let data = [0x01];
        let mut reader = MsgReader::new(&data);
        assert_eq!(reader.read_short(), -1);
        assert!(reader.bad_read());

        reader.begin_reading();
        assert!(!reader.bad_read());
        assert_eq!(reader.read_byte(), 1);
        assert_eq!(reader.read_byte(), -1);
        assert_eq!(reader.read_long(), -1);
        assert!(reader.bad_read());
    }

    #[test]
    fn test_string_stops_at_end_of_data() {
        let data = *b"abc";
        let mut reader = MsgReader::new(&data);
        assert_eq!(reader.read_string(), "abc");
        assert!(reader.bad_read());
    }

    #[test]
    fn test_string_is_capped() {
        let data = vec![b'x'; 3000];
        let mut reader = MsgReader::new(&data);
        assert_eq!(reader.read_string().len(), MAX_MSG_STRING - 1);
        assert_eq!(reader.position(), MAX_MSG_STRING - 1);
    }

    #[test]
    fn test_coord_and_angle_encoding() {
        let mut buf = SizeBuf::alloc(256);
        buf.write_coord(12.5).unwrap();
        buf.write_angle(90.0).unwrap();
        buf.write_angle(450.0).unwrap();
        assert_eq!(buf.data(), &[100, 0, 64, 64]);

        let mut reader = MsgReader::new(buf.data());
        assert_eq!(reader.read_coord(), 12.5);
        assert_eq!(reader.read_angle(), 90.0);
    }

    #[test]
    fn test_vec3_uses_eighth_unit_precision() {
        let mut buf = SizeBuf::alloc(256);
        buf.write_vec3(Vec3::new(1.0, -2.25, 100.125)).unwrap();
        assert_eq!(buf.len(), 6);

        let mut reader = MsgReader::new(buf.data());
        assert_eq!(reader.read_vec3(), Vec3::new(1.0, -2.25, 100.125));
    }
}
