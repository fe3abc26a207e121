//! Development and test helpers
//!
//! **WARNING**: self-signed material only, never point these at a real gateway.

pub mod certs;
pub mod server;

pub use certs::{encrypt_private_key, generate_dev_identity, DevIdentity};
pub use server::{LoopbackServer, ServerScript};
