/// Hash algorithm identifiers used by record MACs, PRFs and transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgId {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgId {
    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlgId::Md5 => 16,
            HashAlgId::Sha1 => 20,
            HashAlgId::Sha256 => 32,
        }
    }

    /// Internal compression block length in bytes.
    pub fn block_len(self) -> usize {
        64
    }
}

/// Symmetric cipher identifiers (algorithm + mode combination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgId {
    /// Identity transform (NULL bulk cipher).
    Null,
    /// RC4 with a 128-bit key.
    Rc4_128,
    /// Triple-DES EDE in CBC mode.
    TripleDesEdeCbc,
    // AES-CBC
    Aes128Cbc,
    Aes256Cbc,
}

impl CipherAlgId {
    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgId::Null => 0,
            CipherAlgId::Rc4_128 => 16,
            CipherAlgId::TripleDesEdeCbc => 24,
            CipherAlgId::Aes128Cbc => 16,
            CipherAlgId::Aes256Cbc => 32,
        }
    }

    /// Block length in bytes; stream ciphers report 1.
    pub fn block_len(self) -> usize {
        match self {
            CipherAlgId::Null | CipherAlgId::Rc4_128 => 1,
            CipherAlgId::TripleDesEdeCbc => 8,
            CipherAlgId::Aes128Cbc | CipherAlgId::Aes256Cbc => 16,
        }
    }

    /// IV length taken from the key block (0 for stream ciphers).
    pub fn iv_len(self) -> usize {
        if self.is_cbc() {
            self.block_len()
        } else {
            0
        }
    }

    /// Returns true for block ciphers run in CBC mode.
    pub fn is_cbc(self) -> bool {
        matches!(
            self,
            CipherAlgId::TripleDesEdeCbc | CipherAlgId::Aes128Cbc | CipherAlgId::Aes256Cbc
        )
    }

    /// Effective strength in bits, used for the security rating.
    pub fn strength_bits(self) -> u32 {
        match self {
            CipherAlgId::Null => 0,
            CipherAlgId::Rc4_128 | CipherAlgId::Aes128Cbc => 128,
            CipherAlgId::TripleDesEdeCbc => 112,
            CipherAlgId::Aes256Cbc => 256,
        }
    }
}
