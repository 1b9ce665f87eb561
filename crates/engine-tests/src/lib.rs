#![allow(dead_code)]

pub mod fixtures;

#[cfg(test)]
mod scenarios;
