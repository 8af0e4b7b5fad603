//! Ed25519 identity keys.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// An identity's Ed25519 keypair plus its derived 32-byte identifier.
///
/// The identity id is `SHA-256(public key)` and doubles as the identity's
/// address in search results and hosting contracts.
#[derive(Debug, Clone)]
pub struct IdentityKeys {
    signing: SigningKey,
    identity_id: [u8; 32],
}

impl IdentityKeys {
    /// Generate a fresh keypair from the supplied RNG.
    ///
    /// The RNG is the simulation-wide one so that a fixed seed reproduces
    /// the same keys.
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::from_secret_bytes(&secret)
    }

    /// Rebuild a keypair from its 32 secret bytes (snapshot restore path).
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        let identity_id = Sha256::digest(signing.verifying_key().as_bytes()).into();
        Self {
            signing,
            identity_id,
        }
    }

    /// The 32-byte identity id, `SHA-256(public key)`.
    pub fn identity_id(&self) -> [u8; 32] {
        self.identity_id
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Secret key bytes (persisted in snapshots).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Sign a message with the identity's key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

/// Verify an Ed25519 signature against a 32-byte public key.
///
/// Returns `false` for malformed keys or signatures rather than erroring;
/// the callers treat any failure as a protocol error.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying.verify(message, &signature).is_ok()
}

/// SHA-256 of arbitrary bytes, used for image hashes and network ids.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sign_and_verify_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys = IdentityKeys::generate(&mut rng);
        let sig = keys.sign(b"hello");
        assert!(verify_signature(&keys.public_key(), b"hello", &sig));
        assert!(!verify_signature(&keys.public_key(), b"tampered", &sig));
    }

    #[test]
    fn identity_id_is_hash_of_public_key() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys = IdentityKeys::generate(&mut rng);
        assert_eq!(keys.identity_id(), sha256(&keys.public_key()));
    }

    #[test]
    fn fixed_seed_reproduces_keys() {
        let a = IdentityKeys::generate(&mut StdRng::seed_from_u64(42));
        let b = IdentityKeys::generate(&mut StdRng::seed_from_u64(42));
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn verify_rejects_malformed_inputs() {
        assert!(!verify_signature(&[1, 2, 3], b"msg", &[0u8; 64]));
        let mut rng = StdRng::seed_from_u64(7);
        let keys = IdentityKeys::generate(&mut rng);
        assert!(!verify_signature(&keys.public_key(), b"msg", &[0u8; 10]));
    }
}
