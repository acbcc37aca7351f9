//! Non-panicking helpers for reading and writing wire fields.
//!
//! All multi-byte fields are big-endian and fixed-width; frame layouts are
//! identical across peers of the same library build.

use bytes::{Buf, BufMut, Bytes};

/// Error for reading from a byte buffer which is too short.
#[derive(Debug, Clone, thiserror::Error)]
#[error("buffer too short")]
pub struct TooShort;

/// Extension trait on [`Bytes`] for reading wire fields without panicking.
pub trait TryGetExt {
    /// Attempts to read a [`u8`] and advance the cursor.
    fn try_get_u8(&mut self) -> Result<u8, TooShort>;

    /// Attempts to read a big-endian [`u16`] and advance the cursor.
    fn try_get_u16(&mut self) -> Result<u16, TooShort>;

    /// Attempts to read a big-endian [`u32`] and advance the cursor.
    fn try_get_u32(&mut self) -> Result<u32, TooShort>;

    /// Attempts to read a big-endian [`u64`] and advance the cursor.
    fn try_get_u64(&mut self) -> Result<u64, TooShort>;

    /// Attempts to read a big-endian [`i64`] and advance the cursor.
    fn try_get_i64(&mut self) -> Result<i64, TooShort>;

    /// Attempts to split off the next `len` bytes.
    ///
    /// The returned [`Bytes`] is a cheap reference-counted view, not a copy.
    fn try_split_to(&mut self, len: usize) -> Result<Bytes, TooShort>;
}

impl TryGetExt for Bytes {
    #[inline]
    fn try_get_u8(&mut self) -> Result<u8, TooShort> {
        if self.remaining() < std::mem::size_of::<u8>() {
            return Err(TooShort);
        }
        Ok(self.get_u8())
    }

    #[inline]
    fn try_get_u16(&mut self) -> Result<u16, TooShort> {
        if self.remaining() < std::mem::size_of::<u16>() {
            return Err(TooShort);
        }
        Ok(self.get_u16())
    }

    #[inline]
    fn try_get_u32(&mut self) -> Result<u32, TooShort> {
        if self.remaining() < std::mem::size_of::<u32>() {
            return Err(TooShort);
        }
        Ok(self.get_u32())
    }

    #[inline]
    fn try_get_u64(&mut self) -> Result<u64, TooShort> {
        if self.remaining() < std::mem::size_of::<u64>() {
            return Err(TooShort);
        }
        Ok(self.get_u64())
    }

    #[inline]
    fn try_get_i64(&mut self) -> Result<i64, TooShort> {
        if self.remaining() < std::mem::size_of::<i64>() {
            return Err(TooShort);
        }
        Ok(self.get_i64())
    }

    #[inline]
    fn try_split_to(&mut self, len: usize) -> Result<Bytes, TooShort> {
        if self.len() < len {
            return Err(TooShort);
        }
        Ok(self.split_to(len))
    }
}

/// Error for writing into a byte buffer which is too short.
#[derive(Debug, Clone, thiserror::Error)]
#[error("buffer too short")]
pub struct WriteTooShort;

/// Extension trait on [`BufMut`] for writing wire fields without panicking.
pub trait TryPutExt {
    /// Attempts to write a byte slice.
    fn try_put_slice(&mut self, src: &[u8]) -> Result<(), WriteTooShort>;

    /// Attempts to write a [`u8`].
    fn try_put_u8(&mut self, n: u8) -> Result<(), WriteTooShort>;

    /// Attempts to write a big-endian [`u16`].
    fn try_put_u16(&mut self, n: u16) -> Result<(), WriteTooShort>;

    /// Attempts to write a big-endian [`u32`].
    fn try_put_u32(&mut self, n: u32) -> Result<(), WriteTooShort>;

    /// Attempts to write a big-endian [`u64`].
    fn try_put_u64(&mut self, n: u64) -> Result<(), WriteTooShort>;

    /// Attempts to write a big-endian [`i64`].
    fn try_put_i64(&mut self, n: i64) -> Result<(), WriteTooShort>;
}

impl<T: BufMut> TryPutExt for T {
    #[inline]
    fn try_put_slice(&mut self, src: &[u8]) -> Result<(), WriteTooShort> {
        if self.remaining_mut() < src.len() {
            return Err(WriteTooShort);
        }
        self.put_slice(src);
        Ok(())
    }

    #[inline]
    fn try_put_u8(&mut self, n: u8) -> Result<(), WriteTooShort> {
        self.try_put_slice(&[n])
    }

    #[inline]
    fn try_put_u16(&mut self, n: u16) -> Result<(), WriteTooShort> {
        self.try_put_slice(&n.to_be_bytes())
    }

    #[inline]
    fn try_put_u32(&mut self, n: u32) -> Result<(), WriteTooShort> {
        self.try_put_slice(&n.to_be_bytes())
    }

    #[inline]
    fn try_put_u64(&mut self, n: u64) -> Result<(), WriteTooShort> {
        self.try_put_slice(&n.to_be_bytes())
    }

    #[inline]
    fn try_put_i64(&mut self, n: i64) -> Result<(), WriteTooShort> {
        self.try_put_slice(&n.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn round_trip_fields() {
        let mut buf = BytesMut::new();
        buf.try_put_u8(0xab).unwrap();
        buf.try_put_u32(0x1234_5678).unwrap();
        buf.try_put_u64(0x1_0000_0000).unwrap();
        buf.try_put_i64(-7).unwrap();

        let mut buf = buf.freeze();
        assert_eq!(0xab, TryGetExt::try_get_u8(&mut buf).unwrap());
        assert_eq!(0x1234_5678, TryGetExt::try_get_u32(&mut buf).unwrap());
        assert_eq!(0x1_0000_0000, TryGetExt::try_get_u64(&mut buf).unwrap());
        assert_eq!(-7, TryGetExt::try_get_i64(&mut buf).unwrap());
        assert_matches!(TryGetExt::try_get_u8(&mut buf), Err(TooShort));
    }

    #[test]
    fn split_to_is_bounds_checked() {
        let mut buf = Bytes::from_static(b"abcde");
        assert_eq!(Bytes::from_static(b"abc"), buf.try_split_to(3).unwrap());
        assert_matches!(buf.try_split_to(3), Err(TooShort));
        assert_eq!(Bytes::from_static(b"de"), buf.try_split_to(2).unwrap());
    }
}
