//! Login handshake: the nested state machine that runs inside the LOGIN
//! protocol state.
//!
//! Online mode walks `AWAIT_LOGIN_START → AWAIT_ENCRYPTION_RESPONSE →
//! AWAIT_SESSION_VERIFY → success`; offline mode jumps from login-start
//! straight to success. The per-attempt state lives in [`AuthSession`],
//! created when login-start arrives and discarded as soon as the attempt
//! resolves either way.
//!
//! The external session service expects the digest of (server id, shared
//! secret, public key) rendered as a *signed* hexadecimal string using the
//! two's-complement convention; [`session_hash`] must byte-match that
//! format.

use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{generate_server_id, generate_verify_token, VERIFY_TOKEN_LEN};

/// RSA modulus width used for the login exchange.
const RSA_BITS: usize = 1024;

/// Where a login attempt currently is. `AWAIT_LOGIN_START` is the absence
/// of an [`AuthSession`] on the connection; the session comes into
/// existence with the first phase that has anything to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Encryption-request sent, waiting for the client's response.
    AwaitEncryptionResponse,
    /// Shared secret established, external verification in flight.
    AwaitSessionVerify,
}

/// Ephemeral per-login-attempt data. Dropped on success or failure; nothing
/// in here survives the LOGIN state.
pub struct AuthSession {
    pub phase: AuthPhase,
    /// Random id string bound into the session hash.
    pub server_id: String,
    /// Random bytes the client must echo back under our public key.
    pub verify_token: [u8; VERIFY_TOKEN_LEN],
}

impl AuthSession {
    /// Start a fresh attempt: new server id, new verify token.
    pub fn begin() -> Self {
        Self {
            phase: AuthPhase::AwaitEncryptionResponse,
            server_id: generate_server_id(),
            verify_token: generate_verify_token(),
        }
    }

    /// Compare the decrypted verify token byte-for-byte against the one we
    /// issued.
    ///
    /// # Errors
    /// Returns `ProtocolError::Auth` on mismatch; the attempt is dead.
    pub fn check_verify_token(&self, echoed: &[u8]) -> Result<()> {
        if echoed != self.verify_token {
            return Err(ProtocolError::Auth(
                constants::ERR_VERIFY_TOKEN_MISMATCH.to_string(),
            ));
        }
        Ok(())
    }
}

/// The server's long-lived RSA key pair, generated once at startup and
/// shared by every connection's login handshake.
pub struct ServerKeyChain {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKeyChain {
    /// Generate a fresh key pair.
    ///
    /// # Errors
    /// Returns `ProtocolError::Crypto` if key generation or DER encoding
    /// fails.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| ProtocolError::Crypto(format!("RSA key generation failed: {e}")))?;
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| ProtocolError::Crypto(format!("Public key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// The public key in its standard encoded (DER, SubjectPublicKeyInfo)
    /// form, as carried by the encryption-request packet and fed into the
    /// session hash.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypt a client payload (shared secret or verify token) with the
    /// private key.
    ///
    /// # Errors
    /// Returns `ProtocolError::Crypto` on any decrypt failure.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, payload)
            .map_err(|_| ProtocolError::Crypto(constants::ERR_RSA_DECRYPT.to_string()))
    }
}

/// Digest binding a login attempt to this server: SHA-1 over the server id
/// bytes, the shared secret, and the DER public key, rendered as a signed
/// hex string.
pub fn session_hash(server_id: &str, shared_secret: &[u8], public_key_der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key_der);
    signed_hex(hasher.finalize().into())
}

/// Render a digest as a signed hexadecimal integer, two's-complement: a
/// digest with the top bit set is negated and prefixed with '-'.
fn signed_hex(mut digest: [u8; 20]) -> String {
    let negative = digest[0] & 0x80 != 0;
    if negative {
        let mut carry = true;
        for byte in digest.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (value, overflow) = byte.overflowing_add(1);
                *byte = value;
                carry = overflow;
            }
        }
    }

    let body: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    let trimmed = body.trim_start_matches('0');
    let magnitude = if trimmed.is_empty() { "0" } else { trimmed };
    if negative {
        format!("-{magnitude}")
    } else {
        magnitude.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Canonical vectors for the signed-hex digest format.
    #[test]
    fn test_session_hash_canonical_vectors() {
        assert_eq!(
            session_hash("Notch", &[], &[]),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            session_hash("jeb_", &[], &[]),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            session_hash("simon", &[], &[]),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }

    #[test]
    fn test_signed_hex_zero() {
        assert_eq!(signed_hex([0u8; 20]), "0");
    }

    #[test]
    fn test_session_hash_covers_all_parts() {
        let base = session_hash("id", &[1, 2, 3], &[4, 5, 6]);
        assert_ne!(base, session_hash("id2", &[1, 2, 3], &[4, 5, 6]));
        assert_ne!(base, session_hash("id", &[1, 2], &[4, 5, 6]));
        assert_ne!(base, session_hash("id", &[1, 2, 3], &[4, 5]));
    }

    #[test]
    fn test_auth_session_freshness() {
        let first = AuthSession::begin();
        let second = AuthSession::begin();
        assert_ne!(first.server_id, second.server_id);
        assert_eq!(first.phase, AuthPhase::AwaitEncryptionResponse);
    }

    #[test]
    fn test_verify_token_comparison() {
        let session = AuthSession::begin();
        assert!(session.check_verify_token(&session.verify_token).is_ok());

        let mut wrong = session.verify_token;
        wrong[0] ^= 0xff;
        assert!(matches!(
            session.check_verify_token(&wrong),
            Err(ProtocolError::Auth(_))
        ));
        assert!(session.check_verify_token(&[]).is_err());
    }

    #[test]
    fn test_keychain_decrypts_what_public_encrypts() {
        use rsa::pkcs8::DecodePublicKey;

        let keys = ServerKeyChain::generate().unwrap();
        let public = RsaPublicKey::from_public_key_der(keys.public_der()).unwrap();

        let mut rng = rand::thread_rng();
        let secret = [0x5au8; 16];
        let sealed = public.encrypt(&mut rng, Pkcs1v15Encrypt, &secret).unwrap();
        assert_eq!(keys.decrypt(&sealed).unwrap(), secret);
    }

    #[test]
    fn test_keychain_rejects_garbage() {
        let keys = ServerKeyChain::generate().unwrap();
        assert!(matches!(
            keys.decrypt(&[0u8; 128]),
            Err(ProtocolError::Crypto(_))
        ));
    }
}
