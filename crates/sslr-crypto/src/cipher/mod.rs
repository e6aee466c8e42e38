//! Symmetric ciphers for record protection.

mod cbc;
mod stream;

pub use cbc::CbcCipher;
pub use stream::NullCipher;
#[cfg(feature = "rc4")]
pub use stream::Rc4Cipher;

use crate::provider::SymmetricCipher;
use sslr_types::{CipherAlgId, CryptoError};

pub type Aes128Cbc = CbcCipher<aes::Aes128>;
pub type Aes256Cbc = CbcCipher<aes::Aes256>;
#[cfg(feature = "des")]
pub type TripleDesCbc = CbcCipher<des::TdesEde3>;

/// Create an unkeyed cipher object for `alg`.
pub fn new_cipher(alg: CipherAlgId) -> Result<Box<dyn SymmetricCipher>, CryptoError> {
    match alg {
        CipherAlgId::Null => Ok(Box::new(NullCipher)),
        CipherAlgId::Aes128Cbc => Ok(Box::new(Aes128Cbc::new())),
        CipherAlgId::Aes256Cbc => Ok(Box::new(Aes256Cbc::new())),
        #[cfg(feature = "des")]
        CipherAlgId::TripleDesEdeCbc => Ok(Box::new(TripleDesCbc::new())),
        #[cfg(feature = "rc4")]
        CipherAlgId::Rc4_128 => Ok(Box::new(Rc4Cipher::new())),
        #[allow(unreachable_patterns)]
        _ => Err(CryptoError::NotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_sizes_match_ids() {
        for alg in [
            CipherAlgId::Null,
            CipherAlgId::Rc4_128,
            CipherAlgId::TripleDesEdeCbc,
            CipherAlgId::Aes128Cbc,
            CipherAlgId::Aes256Cbc,
        ] {
            let c = new_cipher(alg).unwrap();
            assert_eq!(c.block_size(), alg.block_len(), "{alg:?}");
            assert_eq!(c.key_size(), alg.key_len(), "{alg:?}");
            assert_eq!(c.iv_size(), alg.iv_len(), "{alg:?}");
        }
    }
}
