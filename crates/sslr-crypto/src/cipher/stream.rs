use crate::provider::SymmetricCipher;
use sslr_types::CryptoError;

/// The identity cipher of the NULL suites.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl SymmetricCipher for NullCipher {
    fn block_size(&self) -> usize {
        1
    }

    fn key_size(&self) -> usize {
        0
    }

    fn iv_size(&self) -> usize {
        0
    }

    fn load_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if !key.is_empty() {
            return Err(CryptoError::InvalidKeyLength {
                expected: 0,
                got: key.len(),
            });
        }
        Ok(())
    }

    fn load_iv(&mut self, _iv: &[u8]) -> Result<(), CryptoError> {
        Ok(())
    }

    fn encrypt_vector(&mut self, _data: &mut [u8]) -> Result<(), CryptoError> {
        Ok(())
    }

    fn decrypt_vector(&mut self, _data: &mut [u8]) -> Result<(), CryptoError> {
        Ok(())
    }
}

#[cfg(feature = "rc4")]
pub use self::arc4::Rc4Cipher;

#[cfg(feature = "rc4")]
mod arc4 {
    use crate::provider::SymmetricCipher;
    use rc4::consts::U16;
    use rc4::{KeyInit, Rc4, StreamCipher};
    use sslr_types::CryptoError;

    /// RC4 with a 128-bit key.
    #[derive(Default)]
    pub struct Rc4Cipher {
        state: Option<Rc4<U16>>,
    }

    impl Rc4Cipher {
        pub fn new() -> Self {
            Self::default()
        }

        fn apply(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
            let state = self.state.as_mut().ok_or(CryptoError::KeyNotSet)?;
            state.apply_keystream(data);
            Ok(())
        }
    }

    impl SymmetricCipher for Rc4Cipher {
        fn block_size(&self) -> usize {
            1
        }

        fn key_size(&self) -> usize {
            16
        }

        fn iv_size(&self) -> usize {
            0
        }

        fn load_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
            let state = Rc4::<U16>::new_from_slice(key).map_err(|_| {
                CryptoError::InvalidKeyLength {
                    expected: 16,
                    got: key.len(),
                }
            })?;
            self.state = Some(state);
            Ok(())
        }

        fn load_iv(&mut self, iv: &[u8]) -> Result<(), CryptoError> {
            if !iv.is_empty() {
                return Err(CryptoError::InvalidIvLength);
            }
            Ok(())
        }

        fn encrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
            self.apply(data)
        }

        fn decrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
            self.apply(data)
        }
    }

}
