// meridian/core/consensus/src/types.rs

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Keccak256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::from_bytes(&hasher.finalize())
}

/// Hash type for block, transaction and bundle identifiers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord,
)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn new(data: [u8; 32]) -> Self {
        Self(data)
    }

    /// Build a hash from the first 32 bytes of `bytes`.
    ///
    /// Panics if fewer than 32 bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        Self(hash)
    }

    /// Parse a `0x`-prefixed or bare hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        Some(Self::from_bytes(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// 20-byte account address
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Derive the account address of an ed25519 public key
    pub fn from_public_key(pubkey: &PublicKey) -> Self {
        let hash = keccak256(pubkey.as_bytes());
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash.as_bytes()[12..32]);
        Address(addr)
    }

    /// Address of a contract created by `sender` at `nonce`
    pub fn create(sender: &Address, nonce: u64) -> Self {
        let mut data = Vec::with_capacity(28);
        data.extend_from_slice(&sender.0);
        data.extend_from_slice(&nonce.to_le_bytes());
        let hash = keccak256(&data);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash.as_bytes()[12..32]);
        Address(addr)
    }

    pub fn zero() -> Self {
        Address([0u8; 20])
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
        if bytes.len() != 20 {
            return None;
        }
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes);
        Some(Address(addr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Public key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn new(data: [u8; 32]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Signature type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn new(data: [u8; 64]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Invalid signature length"));
        }
        let mut data = [0u8; 64];
        data.copy_from_slice(&bytes);
        Ok(Signature(data))
    }
}

/// Fixed chain parameters shared by every pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    /// Chain ID bound into every transaction signature
    pub chain_id: u64,

    /// Gas limit of the genesis block
    pub genesis_gas_limit: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            genesis_gas_limit: 30_000_000,
        }
    }
}

/// Signed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub chain_id: u64,
    pub nonce: u64,
    pub from: PublicKey,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
    pub signature: Signature,
}

impl Transaction {
    /// Canonical bytes covered by the signature (everything but hash and signature)
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128 + self.data.len());

        data.extend_from_slice(&self.chain_id.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(self.from.as_bytes());

        if let Some(to) = &self.to {
            data.push(1);
            data.extend_from_slice(to.as_bytes());
        } else {
            data.push(0);
        }

        data.extend_from_slice(&self.value.to_le_bytes());
        data.extend_from_slice(&self.gas_limit.to_le_bytes());
        data.extend_from_slice(&self.gas_price.to_le_bytes());

        data.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        data.extend_from_slice(&self.data);

        data
    }

    /// Hash over the signed payload and the signature
    pub fn compute_hash(&self) -> Hash {
        let mut data = self.signing_payload();
        data.extend_from_slice(self.signature.as_bytes());
        keccak256(&data)
    }

    /// Sender account address
    pub fn sender(&self) -> Address {
        Address::from_public_key(&self.from)
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Wire encoding used by the RPC layer
    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain structs into a Vec cannot fail
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub hash: Hash,
    pub parent_hash: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub extra: Vec<u8>,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub tx_root: Hash,
}

impl Header {
    /// Genesis header at height zero
    pub fn genesis(gas_limit: u64, timestamp: u64) -> Self {
        let mut header = Self {
            hash: Hash::default(),
            parent_hash: Hash::default(),
            number: 0,
            timestamp,
            coinbase: Address::zero(),
            extra: b"meridian genesis".to_vec(),
            gas_limit,
            gas_used: 0,
            tx_root: Hash::default(),
        };
        header.hash = header.compute_hash();
        header
    }

    /// Hash over every field except `hash`
    pub fn compute_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(160 + self.extra.len());
        data.extend_from_slice(self.parent_hash.as_bytes());
        data.extend_from_slice(&self.number.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(self.coinbase.as_bytes());
        data.extend_from_slice(&(self.extra.len() as u32).to_le_bytes());
        data.extend_from_slice(&self.extra);
        data.extend_from_slice(&self.gas_limit.to_le_bytes());
        data.extend_from_slice(&self.gas_used.to_le_bytes());
        data.extend_from_slice(self.tx_root.as_bytes());
        keccak256(&data)
    }
}

/// Sealed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }

    pub fn contains_transaction(&self, hash: &Hash) -> bool {
        self.transactions.iter().any(|tx| &tx.hash == hash)
    }
}

/// Root over an ordered list of transaction hashes
pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::default();
    }
    let mut data = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        data.extend_from_slice(tx.hash.as_bytes());
    }
    keccak256(&data)
}

/// Notification emitted for every new canonical head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadNotification {
    pub number: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub timestamp: u64,
    pub coinbase: Address,
}

impl From<&Header> for HeadNotification {
    fn from(header: &Header) -> Self {
        Self {
            number: header.number,
            hash: header.hash,
            parent_hash: header.parent_hash,
            timestamp: header.timestamp,
            coinbase: header.coinbase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(nonce: u64) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce,
            from: PublicKey::new([7; 32]),
            to: Some(Address([2; 20])),
            value: 1000,
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            data: vec![1, 2, 3],
            signature: Signature::new([1; 64]),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    #[test]
    fn test_hash_display_and_hex() {
        let hash = Hash::new([0x12; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(format!("{}", hash), "12121212");
        assert_eq!(Hash::from_hex(&format!("0x{}", hash.to_hex())), Some(hash));
        assert_eq!(Hash::from_hex("0x1234"), None);
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address([0xab; 20]);
        assert_eq!(Address::from_hex(&addr.to_hex()), Some(addr));
        assert_eq!(Address::from_hex("0xabcd"), None);
    }

    #[test]
    fn test_create_address_depends_on_nonce() {
        let sender = Address([9; 20]);
        assert_ne!(Address::create(&sender, 0), Address::create(&sender, 1));
        assert_eq!(Address::create(&sender, 3), Address::create(&sender, 3));
    }

    #[test]
    fn test_transaction_hash_covers_signature() {
        let tx = sample_tx(1);
        let mut other = tx.clone();
        other.signature = Signature::new([2; 64]);
        assert_ne!(tx.compute_hash(), other.compute_hash());
    }

    #[test]
    fn test_transaction_wire_encoding() {
        let tx = sample_tx(5);
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_genesis_header_hash() {
        let genesis = Header::genesis(30_000_000, 0);
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert!(genesis.parent_hash.is_zero());
    }

    #[test]
    fn test_transactions_root_is_order_sensitive() {
        let a = sample_tx(1);
        let b = sample_tx(2);
        assert_ne!(
            transactions_root(&[a.clone(), b.clone()]),
            transactions_root(&[b, a])
        );
        assert!(transactions_root(&[]).is_zero());
    }
}
