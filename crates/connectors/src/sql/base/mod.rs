pub mod adapter;
pub mod error;
pub mod source;
