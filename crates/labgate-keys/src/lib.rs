//! Curve25519 key material for the labgate control plane.
//!
//! WireGuard identifies peers by Curve25519 keys and ships them around as
//! standard base64. This crate owns generation (OS CSPRNG, clamped secret
//! scalars), encoding, and the redaction rules for private material.

pub mod error;
mod keys;

pub use error::KeyError;
pub use keys::{generate_preshared_key, KeyPair, PresharedKey, PrivateKey, PublicKey, KEY_SIZE};
