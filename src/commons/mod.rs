//! Common types used by the various kmsutil components.

pub mod error;
pub mod httpclient;
pub mod util;
