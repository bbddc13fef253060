use core::fmt;

use crate::io::{Decodeable, Encodeable};

/// Identifies a tuple slot on disk. Both the lock manager (as the
/// lockable unit) and the hash index (as the stored value) treat this
/// as an opaque value type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecordId {
    pub page_index: u32,
    pub slot: u32,
}

impl RecordId {
    /// Size of the fixed encoding: two little-endian u32.
    pub const BYTES: usize = 8;

    pub fn new(page_index: u32, slot: u32) -> Self {
        Self { page_index, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rid_{}_{}", self.page_index, self.slot)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return write!(f, "{}", self);
    }
}

impl Encodeable for RecordId {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::BYTES);
        buf.extend_from_slice(&self.page_index.to_le_bytes());
        buf.extend_from_slice(&self.slot.to_le_bytes());
        buf
    }
}

impl Decodeable for RecordId {
    fn decode<R: std::io::Read>(reader: &mut R) -> Self {
        let page_index = u32::decode(reader);
        let slot = u32::decode(reader);
        Self { page_index, slot }
    }
}
