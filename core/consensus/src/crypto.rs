// meridian/core/consensus/src/crypto.rs

use crate::types::{PublicKey, Signature, Transaction};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction hash does not match its contents")]
    HashMismatch,
}

/// Verify a transaction's ed25519 signature and its hash
pub fn verify_transaction(tx: &Transaction) -> Result<(), CryptoError> {
    if tx.hash != tx.compute_hash() {
        return Err(CryptoError::HashMismatch);
    }

    let public_key =
        VerifyingKey::from_bytes(tx.from.as_bytes()).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = DalekSignature::from_bytes(tx.signature.as_bytes());

    public_key
        .verify(&tx.signing_payload(), &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Sign a transaction in place and fill in its hash
pub fn sign_transaction(tx: &mut Transaction, signing_key: &SigningKey) {
    // `from` is part of the signed payload
    tx.from = PublicKey::new(signing_key.verifying_key().to_bytes());

    let signature: DalekSignature = signing_key.sign(&tx.signing_payload());
    tx.signature = Signature::new(signature.to_bytes());
    tx.hash = tx.compute_hash();
}

/// Generate a new random keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::from_bytes(&rand::random())
}

/// Deterministic keypair from a 32-byte hex seed
pub fn keypair_from_hex(seed: &str) -> Option<SigningKey> {
    let bytes = hex::decode(seed.trim_start_matches("0x")).ok()?;
    let seed: [u8; 32] = bytes.try_into().ok()?;
    Some(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Hash};

    fn unsigned_tx() -> Transaction {
        Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce: 1,
            from: PublicKey::default(),
            to: Some(Address([2; 20])),
            value: 1000,
            gas_limit: 21000,
            gas_price: 1_000_000_000,
            data: vec![1, 2, 3],
            signature: Signature::default(),
        }
    }

    #[test]
    fn test_transaction_signing_and_verification() {
        let signing_key = generate_keypair();
        let mut tx = unsigned_tx();

        sign_transaction(&mut tx, &signing_key);
        assert!(verify_transaction(&tx).is_ok());

        // Tampering breaks the hash first
        tx.value = 2000;
        assert!(matches!(
            verify_transaction(&tx),
            Err(CryptoError::HashMismatch)
        ));

        // Re-hashing without re-signing breaks the signature
        tx.hash = tx.compute_hash();
        assert!(matches!(
            verify_transaction(&tx),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn test_chain_id_is_signed() {
        let signing_key = generate_keypair();
        let mut tx = unsigned_tx();
        sign_transaction(&mut tx, &signing_key);

        tx.chain_id = 1;
        tx.hash = tx.compute_hash();
        assert!(verify_transaction(&tx).is_err());
    }

    #[test]
    fn test_keypair_from_hex() {
        let seed = "133be114715e5fe528a1b8adf36792160601a2d63ab59d1fd454275b31328791";
        let a = keypair_from_hex(seed).unwrap();
        let b = keypair_from_hex(&format!("0x{}", seed)).unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert!(keypair_from_hex("abcd").is_none());
    }
}
