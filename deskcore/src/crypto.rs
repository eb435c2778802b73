use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// The DJB type constant prepended to public keys before signing.
const DJB_TYPE: u8 = 5;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random number generator failure: {0}")]
    Rng(String),
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// An X25519 key pair. Serialized in the binary-safe JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "crate::buffer_json")]
    pub public: Vec<u8>,
    #[serde(with = "crate::buffer_json")]
    pub private: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        fill_random(&mut seed)?;
        Ok(Self::from_private_key(seed))
    }

    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let private = StaticSecret::from(clamp(private_key));
        let public = PublicKey::from(&private);
        Self {
            public: public.as_bytes().to_vec(),
            private: private.to_bytes().to_vec(),
        }
    }

    fn private_bytes(&self) -> Result<[u8; 32], CryptoError> {
        self.private
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(self.private.len()))
    }

    /// Signs `other`'s public key, prefixed with the DJB type byte.
    pub fn sign_public_key(&self, other: &KeyPair) -> Result<[u8; 64], CryptoError> {
        let mut message = Vec::with_capacity(33);
        message.push(DJB_TYPE);
        message.extend_from_slice(&other.public);
        self.sign(&message)
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], CryptoError> {
        let mut random = [0u8; 64];
        fill_random(&mut random)?;
        Ok(xeddsa_sign(&self.private_bytes()?, message, &random))
    }
}

/// A pre-key signed by the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    #[serde(with = "crate::buffer_json")]
    pub signature: Vec<u8>,
    pub key_id: u32,
}

impl SignedKeyPair {
    pub fn generate(identity: &KeyPair, key_id: u32) -> Result<Self, CryptoError> {
        let key_pair = KeyPair::generate()?;
        let signature = identity.sign_public_key(&key_pair)?;
        Ok(Self {
            key_pair,
            signature: signature.to_vec(),
            key_id,
        })
    }

    pub fn verify(&self, identity_public: &[u8]) -> bool {
        let Ok(public) = <[u8; 32]>::try_from(identity_public) else {
            return false;
        };
        let Ok(signature) = <[u8; 64]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        let mut message = Vec::with_capacity(33);
        message.push(DJB_TYPE);
        message.extend_from_slice(&self.key_pair.public);
        xeddsa_verify(&public, &message, &signature)
    }
}

pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::Rng(e.to_string()))
}

fn clamp(mut key: [u8; 32]) -> [u8; 32] {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
    key
}

fn wide_scalar(hasher: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// XEd25519 signature over `message` with an X25519 private key. The Edwards sign bit of the
/// derived public key is carried in the top bit of the last signature byte.
pub fn xeddsa_sign(private_key: &[u8; 32], message: &[u8], random: &[u8; 64]) -> [u8; 64] {
    let key_data = clamp(*private_key);
    let a = Scalar::from_bytes_mod_order(key_data);
    let ed_public = EdwardsPoint::mul_base(&a).compress();
    let sign_bit = ed_public.as_bytes()[31] & 0b1000_0000;

    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFE;
    let mut hash1 = Sha512::new();
    hash1.update(prefix);
    hash1.update(key_data);
    hash1.update(message);
    hash1.update(random);
    let r = wide_scalar(hash1);
    let cap_r = EdwardsPoint::mul_base(&r).compress();

    let mut hash2 = Sha512::new();
    hash2.update(cap_r.as_bytes());
    hash2.update(ed_public.as_bytes());
    hash2.update(message);
    let h = wide_scalar(hash2);
    let s = h * a + r;

    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(cap_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature[63] &= 0b0111_1111;
    signature[63] |= sign_bit;
    signature
}

pub fn xeddsa_verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Some(ed_public) = MontgomeryPoint(*public_key).to_edwards((signature[63] & 0x80) >> 7)
    else {
        return false;
    };
    let cap_a = ed_public.compress();

    let mut cap_r = [0u8; 32];
    cap_r.copy_from_slice(&signature[..32]);
    let mut s = [0u8; 32];
    s.copy_from_slice(&signature[32..]);
    s[31] &= 0x7F;
    if s[31] & 0xE0 != 0 {
        return false;
    }

    let mut hash = Sha512::new();
    hash.update(cap_r);
    hash.update(cap_a.as_bytes());
    hash.update(message);
    let h = wide_scalar(hash);

    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
        &h,
        &-ed_public,
        &Scalar::from_bytes_mod_order(s),
    )
    .compress();
    bool::from(check.as_bytes()[..].ct_eq(&cap_r[..]))
}
