use core::fmt;

use crate::io::{Decodeable, Encodeable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCategory {
    Directory,
    Bucket,
}

impl fmt::Display for PageCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// # Format
///
/// - 4 bytes: category marker
impl Encodeable for PageCategory {
    fn encode(&self) -> Vec<u8> {
        let marker: u32 = match self {
            PageCategory::Directory => 0,
            PageCategory::Bucket => 1,
        };
        marker.encode()
    }
}

impl Decodeable for PageCategory {
    fn decode<R: std::io::Read>(reader: &mut R) -> Self {
        let marker = u32::decode(reader);
        match marker {
            0 => PageCategory::Directory,
            1 => PageCategory::Bucket,
            _ => panic!("invalid page category marker: {}", marker),
        }
    }
}
