//! RSA-PSS/SHA-256 signing and verification, plus the PEM and hex codecs
//! used on the wire.

use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::constants::MIN_KEY_BITS;
use crate::error::{ChainError, ChainResult};

/// First line of every public key on the wire.
pub const PUBLIC_KEY_PEM_HEADER: &str = "-----BEGIN RSA PUBLIC KEY-----";

/// A node's key pair, generated once at startup and held for the node's
/// lifetime. The public half is kept pre-encoded because it doubles as the
/// node's identity string in claims and signatures.
pub struct NodeKeys {
    private_key: RsaPrivateKey,
    public_pem: String,
}

impl NodeKeys {
    pub fn generate(bits: usize) -> ChainResult<Self> {
        let private_key = generate_private_key(bits)?;
        let public_pem = public_key_to_pem(&private_key.to_public_key())?;
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> ChainResult<Self> {
        let public_pem = public_key_to_pem(&private_key.to_public_key())?;
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn sign(&self, body: &[u8]) -> Vec<u8> {
        sign(&self.private_key, body)
    }
}

pub fn generate_private_key(bits: usize) -> ChainResult<RsaPrivateKey> {
    if bits < MIN_KEY_BITS {
        return Err(ChainError::Config(format!(
            "key size {bits} is below the {MIN_KEY_BITS}-bit minimum"
        )));
    }
    RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|err| ChainError::Crypto(format!("could not generate key pair: {err}")))
}

/// RSA-PSS over SHA-256 with a fresh salt per signature.
pub fn sign(private_key: &RsaPrivateKey, body: &[u8]) -> Vec<u8> {
    let signing_key = BlindedSigningKey::<Sha256>::new(private_key.clone());
    signing_key
        .sign_with_rng(&mut rand::thread_rng(), body)
        .to_vec()
}

pub fn verify(public_key: &RsaPublicKey, body: &[u8], signature: &[u8]) -> ChainResult<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signature = Signature::try_from(signature)
        .map_err(|err| ChainError::Crypto(format!("malformed signature: {err}")))?;
    verifying_key
        .verify(body, &signature)
        .map_err(|err| ChainError::Crypto(format!("signature verification failed: {err}")))
}

/// Verify against a PEM-encoded public key straight off the wire.
pub fn verify_pem(public_pem: &str, body: &[u8], signature: &[u8]) -> ChainResult<()> {
    let public_key = public_key_from_pem(public_pem)?;
    verify(&public_key, body, signature)
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> ChainResult<String> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|err| ChainError::Crypto(format!("could not encode public key: {err}")))
}

pub fn public_key_from_pem(pem: &str) -> ChainResult<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(pem)
        .map_err(|err| ChainError::Crypto(format!("could not decode public key: {err}")))
}

/// Private keys only ever touch disk through the client tool; the node keeps
/// its pair in memory for its lifetime.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> ChainResult<String> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map(|pem| (*pem).clone())
        .map_err(|err| ChainError::Crypto(format!("could not encode private key: {err}")))
}

pub fn private_key_from_pem(pem: &str) -> ChainResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|err| ChainError::Crypto(format!("could not decode private key: {err}")))
}

pub fn signature_to_hex(signature: &[u8]) -> String {
    hex::encode(signature)
}

pub fn signature_from_hex(encoded: &str) -> ChainResult<Vec<u8>> {
    hex::decode(encoded)
        .map_err(|err| ChainError::Crypto(format!("could not decode hex signature: {err}")))
}
