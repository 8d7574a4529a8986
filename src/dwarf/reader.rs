//! A stateful byte cursor over a mapped DWARF section.
//!
//! `Reader` never allocates on a read path: strings and blocks are returned as sub-slices of the
//! borrowed section, not owned copies. Every read either succeeds and advances the cursor past
//! the value, or fails and leaves the cursor exactly where the partial read found it.

/// Cursor over a borrowed byte slice, decoding DWARF's handful of primitive encodings.
#[derive(Clone, Copy, Debug)]
pub struct Reader<'d> {
    data: &'d [u8],
    pos: usize,
}

impl<'d> Reader<'d> {
    /// Creates a reader over the whole of `data`, positioned at offset 0.
    pub fn new(data: &'d [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The current byte offset from the start of the section.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// The number of bytes still available to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Repositions the cursor to an absolute offset within the section.
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }

    /// Advances the cursor by `n` bytes without interpreting them. Fails if fewer than `n` bytes
    /// remain, leaving the cursor unmoved.
    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() < n {
            return false;
        }
        self.pos += n;
        true
    }

    fn take(&mut self, n: usize) -> Option<&'d [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Reads an unsigned 8-bit integer.
    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Reads a signed 8-bit integer.
    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_u8().map(|b| b as i8)
    }

    /// Reads a little-endian unsigned 16-bit integer (host endianness for the mapped file; this
    /// crate only targets little-endian x86/x86-64, per spec §1).
    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Reads a target address, 4 or 8 bytes depending on the compile unit's address size.
    pub fn read_addr(&mut self, addr_size: u8) -> Option<u64> {
        match addr_size {
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => None,
        }
    }

    /// Reads an unsigned LEB128-encoded integer.
    pub fn read_uleb128(&mut self) -> Option<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Some(result)
    }

    /// Reads a signed LEB128-encoded integer.
    pub fn read_sleb128(&mut self) -> Option<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut byte;
        loop {
            byte = self.read_u8()?;
            if shift < 64 {
                result |= i64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && (byte & 0x40) != 0 {
            result |= -1i64 << shift;
        }
        Some(result)
    }

    /// Reads a null-terminated string, returning a borrowed view excluding the terminator. Fails
    /// (without consuming anything) if no NUL byte is found before the section ends.
    pub fn read_cstr(&mut self) -> Option<&'d [u8]> {
        let start = self.pos;
        let nul = self.data[start..].iter().position(|&b| b == 0)?;
        let s = &self.data[start..start + nul];
        self.pos = start + nul + 1;
        Some(s)
    }

    /// Reads a length-prefixed block: `len` encoded as a ULEB128 followed by `len` raw bytes.
    pub fn read_block(&mut self) -> Option<&'d [u8]> {
        let len = self.read_uleb128()? as usize;
        self.take(len)
    }

    /// Reads a fixed-size block whose length is already known (`block1`/`block2`/`block4`).
    pub fn read_block_sized(&mut self, len: usize) -> Option<&'d [u8]> {
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fixed_width_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u8(), Some(0x01));
        assert_eq!(r.read_u16(), Some(0x0302));
        assert_eq!(r.read_u32(), Some(0x0807_0605));
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn fails_without_moving_on_truncation() {
        let data = [0x01, 0x02];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u32(), None);
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn uleb128_multi_byte() {
        // 624485 encodes as E5 8E 26 in the DWARF spec example.
        let data = [0xE5, 0x8E, 0x26];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_uleb128(), Some(624485));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn sleb128_negative() {
        // -2 encodes as 0x7e.
        let data = [0x7e];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_sleb128(), Some(-2));
    }

    #[test]
    fn sleb128_positive_needs_no_sign_extend() {
        let data = [0x02];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_sleb128(), Some(2));
    }

    #[test]
    fn cstr_excludes_terminator_and_advances_past_it() {
        let data = b"hi\0rest";
        let mut r = Reader::new(data);
        assert_eq!(r.read_cstr(), Some(&b"hi"[..]));
        assert_eq!(r.offset(), 3);
    }

    #[test]
    fn block_reads_uleb128_length_then_bytes() {
        let data = [0x03, b'a', b'b', b'c'];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_block(), Some(&b"abc"[..]));
    }

    #[test]
    fn seek_repositions_absolutely() {
        let data = [1, 2, 3, 4];
        let mut r = Reader::new(&data);
        r.seek(2);
        assert_eq!(r.read_u8(), Some(3));
    }
}
