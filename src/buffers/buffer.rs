//! Buffer storage and used-length bookkeeping

use crate::error::{Error, Result};

/// A single reusable memory region with a fixed capacity and a current
/// used length.
///
/// Two flavors exist: fixed-length buffers always report `len == capacity`,
/// resizable buffers carry a settable used length up to the capacity.
#[derive(Debug)]
pub struct BufferInner {
    data: Box<[u8]>,
    len: usize,
    resizable: bool,
}

impl BufferInner {
    pub(crate) fn new(capacity: usize, resizable: bool) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: if resizable { 0 } else { capacity },
            resizable,
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current used length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_resizable(&self) -> bool {
        self.resizable
    }

    /// Set the used length (resizable buffers only)
    ///
    /// Exceeding the capacity, or resizing a fixed-length buffer to anything
    /// but its capacity, is a caller bug.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() || (!self.resizable && len != self.data.len()) {
            return Err(Error::InvalidLength {
                requested: len,
                capacity: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// The used region
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The used region, mutable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Copy `src` into the buffer and set the used length accordingly
    pub fn fill_from(&mut self, src: &[u8]) -> Result<()> {
        self.set_len(src.len())?;
        self.data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Reset the used length ahead of reuse
    pub(crate) fn reset(&mut self) {
        if self.resizable {
            self.len = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resizable_len() {
        let mut buf = BufferInner::new(64, true);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.len(), 0);
        assert!(buf.set_len(64).is_ok());
        assert_eq!(buf.len(), 64);
        assert!(matches!(
            buf.set_len(65),
            Err(Error::InvalidLength {
                requested: 65,
                capacity: 64
            })
        ));
    }

    #[test]
    fn test_fixed_len() {
        let mut buf = BufferInner::new(32, false);
        assert_eq!(buf.len(), 32);
        assert!(buf.set_len(32).is_ok());
        assert!(buf.set_len(16).is_err());
    }

    #[test]
    fn test_fill_from() {
        let mut buf = BufferInner::new(8, true);
        buf.fill_from(&[1, 2, 3]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert!(buf.fill_from(&[0u8; 9]).is_err());
    }
}
