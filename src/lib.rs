//! The _kmsutil_ library crate.
//!
//! Imports private keys into, and signs with keys held in, the transit
//! backend of a Vault compatible key management service.

pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod kms;
pub mod signing;
