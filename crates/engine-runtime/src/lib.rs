pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod guard;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod provision;

#[cfg(test)]
mod test_support;
