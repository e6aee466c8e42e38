use crate::provider::SymmetricCipher;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit, KeySizeUser};
use sslr_types::CryptoError;
use zeroize::Zeroize;

/// CBC mode over a RustCrypto block cipher.
///
/// The chaining value persists across calls: after `encrypt_vector` it
/// holds the last ciphertext block, so TLS 1.0 implicit IVs fall out of
/// consecutive records naturally.
pub struct CbcCipher<C> {
    cipher: Option<C>,
    chain: Vec<u8>,
}

impl<C> CbcCipher<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + Send,
{
    pub fn new() -> Self {
        Self {
            cipher: None,
            chain: vec![0u8; <C as BlockSizeUser>::block_size()],
        }
    }

    fn check_aligned(&self, len: usize) -> Result<(), CryptoError> {
        if len % <C as BlockSizeUser>::block_size() != 0 {
            return Err(CryptoError::NotBlockAligned(len));
        }
        Ok(())
    }
}

impl<C> Default for CbcCipher<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SymmetricCipher for CbcCipher<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + Send,
{
    fn block_size(&self) -> usize {
        <C as BlockSizeUser>::block_size()
    }

    fn key_size(&self) -> usize {
        <C as KeySizeUser>::key_size()
    }

    fn iv_size(&self) -> usize {
        <C as BlockSizeUser>::block_size()
    }

    fn load_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: <C as KeySizeUser>::key_size(),
            got: key.len(),
        })?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn load_iv(&mut self, iv: &[u8]) -> Result<(), CryptoError> {
        if iv.len() != <C as BlockSizeUser>::block_size() {
            return Err(CryptoError::InvalidIvLength);
        }
        self.chain.copy_from_slice(iv);
        Ok(())
    }

    fn encrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        self.check_aligned(data.len())?;
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        for block in data.chunks_exact_mut(<C as BlockSizeUser>::block_size()) {
            for (b, c) in block.iter_mut().zip(&self.chain) {
                *b ^= c;
            }
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
            self.chain.copy_from_slice(block);
        }
        Ok(())
    }

    fn decrypt_vector(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        self.check_aligned(data.len())?;
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        let mut saved = vec![0u8; <C as BlockSizeUser>::block_size()];
        for block in data.chunks_exact_mut(<C as BlockSizeUser>::block_size()) {
            saved.copy_from_slice(block);
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
            for (b, c) in block.iter_mut().zip(&self.chain) {
                *b ^= c;
            }
            self.chain.copy_from_slice(&saved);
        }
        Ok(())
    }
}

impl<C> Drop for CbcCipher<C> {
    fn drop(&mut self) {
        self.chain.zeroize();
    }
}
