//! The message cipher used for mesh messages.
//!
//! The bridge only ever decrypts, when displaying a mesh payload.
//! Actual ciphers live outside this crate and plug in through [`Cipher`].

use std::fmt::Debug;

/// Encrypts and decrypts mesh message bodies.
pub trait Cipher: Debug + Send + Sync {
    /// Turn plaintext into ciphertext.
    fn encrypt(&self, message: &str) -> String;

    /// Turn ciphertext into plaintext.
    fn decrypt(&self, message: &str) -> String;
}

/// Leaves messages untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Cipher for Passthrough {
    fn encrypt(&self, message: &str) -> String {
        message.to_owned()
    }

    fn decrypt(&self, message: &str) -> String {
        message.to_owned()
    }
}
