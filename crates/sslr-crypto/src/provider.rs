//! Provider traits for the primitives the protocol engine consumes.
//!
//! The engine never touches a concrete algorithm: it drives boxed trait
//! objects, which keeps record protection testable with instrumented
//! stand-ins.

use sslr_types::CryptoError;

/// A hash / message digest algorithm.
pub trait Digest: Send + Sync {
    /// The output size in bytes.
    fn output_size(&self) -> usize;

    /// The internal block size in bytes.
    fn block_size(&self) -> usize;

    /// Feed data into the hash state.
    fn update(&mut self, data: &[u8]) -> Result<(), CryptoError>;

    /// Finalize the hash and write the digest to `out`.
    /// The length of `out` must be at least `output_size()`.
    /// The context is reset afterwards.
    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError>;

    /// Reset the hash state to process a new message.
    fn reset(&mut self);
}

/// A symmetric cipher bound to one traffic direction.
///
/// Block ciphers keep their chaining state between calls, so consecutive
/// `encrypt_vector` calls continue a single CBC stream. Stream ciphers
/// report a block size of 1.
pub trait SymmetricCipher: Send {
    /// Block size in bytes (1 for stream ciphers).
    fn block_size(&self) -> usize;

    /// Key size in bytes.
    fn key_size(&self) -> usize;

    /// IV size in bytes (0 for stream ciphers).
    fn iv_size(&self) -> usize;

    /// Install the key.
    fn load_key(&mut self, key: &[u8]) -> Result<(), CryptoError>;

    /// Install the initial chaining value.
    fn load_iv(&mut self, iv: &[u8]) -> Result<(), CryptoError>;

    /// Encrypt `data` in place. Block ciphers require block-aligned input.
    fn encrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError>;

    /// Decrypt `data` in place. Block ciphers require block-aligned input.
    fn decrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError>;
}
