pub mod extraction;
pub mod query;
