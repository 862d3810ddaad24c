//! Symmetric stream stage for the wire: AES-128 in CFB-8 mode, key and IV
//! both taken from the shared secret negotiated during login. CFB-8 is
//! self-synchronizing per byte, so the pair below can be fed arbitrary
//! chunks of the stream without any alignment requirements.

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::error::{constants, ProtocolError, Result};

type Cfb8Enc = cfb8::Encryptor<Aes128>;
type Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Length of the shared secret, and therefore of the cipher key and IV.
pub const SECRET_LEN: usize = 16;

/// Length of the verify token echoed back by the client.
pub const VERIFY_TOKEN_LEN: usize = 4;

/// Outbound half of the stream cipher.
pub struct StreamEncryptor(Cfb8Enc);

/// Inbound half of the stream cipher.
pub struct StreamDecryptor(Cfb8Dec);

impl StreamEncryptor {
    /// Encrypt `data` in place, advancing the keystream.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        let (chunks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.0.encrypt_blocks_inout_mut(chunks);
    }
}

impl StreamDecryptor {
    /// Decrypt `data` in place, advancing the keystream.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        let (chunks, rest) = InOutBuf::from(data).into_chunks();
        debug_assert!(rest.is_empty());
        self.0.decrypt_blocks_inout_mut(chunks);
    }
}

/// Build both directions of the stream cipher from a shared secret.
///
/// # Errors
/// Returns `ProtocolError::Crypto` if the secret is not exactly
/// [`SECRET_LEN`] bytes.
pub fn cipher_pair(secret: &[u8]) -> Result<(StreamEncryptor, StreamDecryptor)> {
    let enc = Cfb8Enc::new_from_slices(secret, secret)
        .map_err(|_| ProtocolError::Crypto(constants::ERR_BAD_SECRET_LENGTH.to_string()))?;
    let dec = Cfb8Dec::new_from_slices(secret, secret)
        .map_err(|_| ProtocolError::Crypto(constants::ERR_BAD_SECRET_LENGTH.to_string()))?;
    Ok((StreamEncryptor(enc), StreamDecryptor(dec)))
}

/// Random bytes the client must echo back encrypted to prove possession of
/// the server's public key.
pub fn generate_verify_token() -> [u8; VERIFY_TOKEN_LEN] {
    let mut token = [0u8; VERIFY_TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut token);
    token
}

/// Random server id string, fresh per login attempt.
pub fn generate_server_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
