pub mod cell;
pub mod record_id;

pub use cell::*;
pub use record_id::*;
