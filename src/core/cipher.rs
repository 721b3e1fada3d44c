//! Reversible byte-wise XOR cipher.
//!
//! Applying the cipher twice with the same key restores the original bytes.
//! This is obfuscation for backups at rest, not a security primitive.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{EngineError, EngineResult};

pub const MIN_KEY_CHARS: usize = 8;

/// Buffer size for in-place file encryption
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl std::fmt::Debug for XorCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorCipher")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl XorCipher {
    pub fn new(passphrase: &str) -> EngineResult<Self> {
        if passphrase.chars().count() < MIN_KEY_CHARS {
            return Err(EngineError::KeyTooShort);
        }
        Ok(Self {
            key: passphrase.as_bytes().to_vec(),
        })
    }

    /// XOR `data` in place. `offset` is the position of `data[0]` in the
    /// whole stream, so chunks can be processed independently.
    pub fn apply(&self, data: &mut [u8], offset: u64) {
        let len = self.key.len() as u64;
        for (i, byte) in data.iter_mut().enumerate() {
            let k = ((offset + i as u64) % len) as usize;
            *byte ^= self.key[k];
        }
    }

    /// Encrypt (or decrypt) a file in place, chunk by chunk.
    pub fn apply_file(&self, path: &Path) -> io::Result<u64> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut offset: u64 = 0;

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            self.apply(&mut buffer[..bytes_read], offset);

            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&buffer[..bytes_read])?;
            offset += bytes_read as u64;
        }

        file.sync_all()?;
        Ok(offset)
    }
}
