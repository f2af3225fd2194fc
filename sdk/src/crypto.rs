use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};

use crate::error::VoiceError;

/// Secret key length in bytes.
pub const KEY_LEN: usize = 32;
/// Cipher nonce length in bytes.
pub const NONCE_LEN: usize = 24;
/// Authentication tag length appended to every sealed payload.
pub const MAC_LEN: usize = 16;

/// Packet cipher for the media transport: NaCl secretbox
/// (XSalsa20Poly1305) keyed with the session key from SESSION_DESCRIPTION.
///
/// The 24-byte nonce is derived from the 12-byte packet header; the
/// remaining 12 bytes stay zero.
pub struct PacketCipher {
    cipher: XSalsa20Poly1305,
}

impl PacketCipher {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XSalsa20Poly1305::new(Key::from_slice(key)),
        }
    }

    fn nonce(header: &[u8]) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        let seed = header.len().min(NONCE_LEN / 2);
        nonce[..seed].copy_from_slice(&header[..seed]);
        nonce
    }

    /// Authenticated-decrypts a sealed payload under the header-derived
    /// nonce. Authentication failure is returned as a value; the caller
    /// drops the packet and keeps the stream alive.
    pub fn open(&self, header: &[u8], sealed: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let nonce = Self::nonce(header);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed)
            .map_err(|_| VoiceError::Decrypt("packet failed authentication".to_string()))
    }

    /// Seals a plaintext under the header-derived nonce. The inbound path
    /// never uses this; it exists for loopback tests and symmetric peers.
    pub fn seal(&self, header: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let nonce = Self::nonce(header);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| VoiceError::Decrypt("sealing failed".to_string()))
    }
}
