//! Dashforge core library exports

pub mod blueprint;
pub mod build;
pub mod gate;
pub mod package;
pub mod publish;
pub mod resolve;
