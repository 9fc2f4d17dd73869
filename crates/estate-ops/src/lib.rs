//! Landlord and field-service back office: eviction notice tracking and
//! escrowed milestone payouts through an external payment processor.

pub mod config;
pub mod error;
pub mod money;
pub mod telemetry;
pub mod workflows;

pub use money::Money;
