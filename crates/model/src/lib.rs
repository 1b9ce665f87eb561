pub mod core;
pub mod destination;
pub mod source;
pub mod tracking;
