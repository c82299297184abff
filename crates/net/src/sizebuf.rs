pub const MIN_SIZEBUF_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeBufError {
    #[error("SZ_GetSpace: overflow without allow_overflow set ({requested} bytes, {len}/{capacity} used)")]
    Overflow {
        requested: usize,
        len: usize,
        capacity: usize,
    },
    #[error("SZ_GetSpace: {requested} is > full buffer size {capacity}")]
    TooLarge { requested: usize, capacity: usize },
}

/// Fixed-capacity byte buffer used for both building outbound messages and
/// holding the current inbound one.
#[derive(Debug, Clone)]
pub struct SizeBuf {
    data: Vec<u8>,
    len: usize,
    pub allow_overflow: bool,
    overflowed: bool,
}

impl SizeBuf {
    pub fn alloc(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_SIZEBUF_CAPACITY);
        Self {
            data: vec![0; capacity],
            len: 0,
            allow_overflow: false,
            overflowed: false,
        }
    }

    pub fn with_overflow(capacity: usize) -> Self {
        let mut buf = Self::alloc(capacity);
        buf.allow_overflow = true;
        buf
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn get_space(&mut self, length: usize) -> Result<&mut [u8], SizeBufError> {
        let capacity = self.data.len();
        if self.len + length > capacity {
            if !self.allow_overflow {
                return Err(SizeBufError::Overflow {
                    requested: length,
                    len: self.len,
                    capacity,
                });
            }
            if length > capacity {
                return Err(SizeBufError::TooLarge {
                    requested: length,
                    capacity,
                });
            }
            log::warn!("SZ_GetSpace: overflow");
            self.clear();
            self.overflowed = true;
        }

        let start = self.len;
        self.len += length;
        Ok(&mut self.data[start..start + length])
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SizeBufError> {
        self.get_space(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Appends a NUL-terminated string, overwriting the previous terminator
    /// so consecutive prints concatenate.
    pub fn print(&mut self, text: &str) -> Result<(), SizeBufError> {
        let bytes = text.as_bytes();
        if self.len > 0 && self.data[self.len - 1] == 0 {
            self.len -= 1;
        }
        self.write(bytes)?;
        self.write(&[0])
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Whole backing store, for reading a datagram straight into the buffer.
    pub(crate) fn space_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    pub(crate) fn replace(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_enforces_minimum_capacity() {
        let buf = SizeBuf::alloc(16);
        assert_eq!(buf.capacity(), MIN_SIZEBUF_CAPACITY);
        assert!(buf.is_empty());

        let buf = SizeBuf::alloc(8192);
        assert_eq!(buf.capacity(), 8192);
    }

    #[test]
    fn test_write_appends_and_clear_resets() {
        let mut buf = SizeBuf::alloc(256);
        buf.write(&[1, 2, 3]).unwrap();
        buf.write(&[4]).unwrap();
        assert_eq!(buf.data(), &[1, 2, 3, 4]);

        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 256);
    }

    #[test]
    fn test_overflow_is_error_when_not_allowed() {
        let mut buf = SizeBuf::alloc(256);
        buf.write(&[0; 250]).unwrap();
        let err = buf.write(&[0; 10]).unwrap_err();
        assert!(matches!(err, SizeBufError::Overflow { requested: 10, .. }));
        assert_eq!(buf.len(), 250);
    }

    #[test]
    fn test_allowed_overflow_clears_and_flags() {
        let mut buf = SizeBuf::with_overflow(256);
        buf.write(&[7; 250]).unwrap();
        buf.write(&[9; 10]).unwrap();
        assert!(buf.overflowed());
        assert_eq!(buf.data(), &[9; 10]);
    }

    #[test]
    fn test_allowed_overflow_still_rejects_oversized_write() {
        let mut buf = SizeBuf::with_overflow(256);
        let err = buf.write(&[0; 300]).unwrap_err();
        assert_eq!(
            err,
            SizeBufError::TooLarge {
                requested: 300,
                capacity: 256
            }
        );
    }

    #[test]
    fn test_print_concatenates_strings() {
        let mut buf = SizeBuf::alloc(256);
        buf.print("abc").unwrap();
        buf.print("de").unwrap();
        assert_eq!(buf.data(), b"abcde\0");
    }
}
