use std::cmp::Ordering;

use crate::io::{read_exact, Decodeable, Encodeable};

/// A single field value. Only fixed-width kinds are allowed so index
/// pages can lay cells out in fixed slots.
#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
}

/// Compares two keys, 0 (Equal) means a match.
pub type KeyComparator = fn(&Cell, &Cell) -> Ordering;

pub fn cell_comparator(a: &Cell, b: &Cell) -> Ordering {
    a.cmp(b)
}

impl Cell {
    /// Size of the fixed encoding: 1 tag byte + 8 payload bytes.
    pub const BYTES: usize = 9;

    fn tag(&self) -> u8 {
        match self {
            Cell::Null => 0,
            Cell::Bool(_) => 1,
            Cell::Int64(_) => 2,
            Cell::Float64(_) => 3,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Int64(a), Cell::Int64(b)) => a.cmp(b),
            (Cell::Float64(a), Cell::Float64(b)) => a.total_cmp(b),
            // cells of different kinds order by their tag
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl Encodeable for Cell {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::BYTES);
        buf.push(self.tag());
        match self {
            Cell::Null => buf.extend_from_slice(&[0; 8]),
            Cell::Bool(v) => {
                buf.push(*v as u8);
                buf.extend_from_slice(&[0; 7]);
            }
            Cell::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Cell::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        }
        buf
    }
}

impl Decodeable for Cell {
    fn decode<R: std::io::Read>(reader: &mut R) -> Self {
        let tag = u8::decode(reader);
        let payload = read_exact(reader, 8);
        match tag {
            0 => Cell::Null,
            1 => Cell::Bool(payload[0] == 1),
            2 => Cell::Int64(i64::from_le_bytes(payload.try_into().unwrap())),
            3 => Cell::Float64(f64::from_le_bytes(payload.try_into().unwrap())),
            _ => panic!("invalid cell tag: {}", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_codec() {
        let cells = vec![
            Cell::Null,
            Cell::Bool(true),
            Cell::Int64(-42),
            Cell::Float64(3.5),
        ];

        for cell in cells {
            let bytes = cell.encode();
            assert_eq!(bytes.len(), Cell::BYTES);

            let mut reader = std::io::Cursor::new(bytes);
            let decoded = Cell::decode(&mut reader);
            assert_eq!(cell, decoded);
        }
    }

    #[test]
    fn test_cell_order() {
        assert!(Cell::Int64(1) < Cell::Int64(2));
        assert_eq!(cell_comparator(&Cell::Int64(7), &Cell::Int64(7)), std::cmp::Ordering::Equal);
    }
}
