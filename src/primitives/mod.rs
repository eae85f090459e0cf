//! Block and transaction primitives
//!
//! Just enough of the Bitcoin data model to construct scenario artifacts,
//! serialize them byte-for-byte the way the reference implementation expects
//! over RPC, and run structural checks on the candidate side.

pub mod encode;
pub mod hashing;
pub mod network;
pub mod pow;
pub mod script;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use encode::{DecodeError, Decoder, Encoder};
pub use hashing::{double_sha256, merkle_root};
pub use network::{ConsensusParams, Network};

/// Satoshis per coin
pub const COIN: i64 = 100_000_000;
/// Largest representable amount
pub const MAX_MONEY: i64 = 21_000_000 * COIN;
/// Sequence value marking a final input
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// 32-byte hash stored in internal byte order
///
/// `Display`/`FromStr` use the reversed hex form the reference's RPC interface
/// prints for block and transaction ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parse the reversed-hex form used by RPC
    pub fn from_rpc_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = encode::decode_hex(s)?;
        if bytes.len() != 32 {
            return Err(DecodeError::Hex(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, b) in bytes.iter().rev().enumerate() {
            out[i] = *b;
        }
        Ok(Hash256(out))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_rpc_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_rpc_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint spent by coinbase inputs
    pub const NULL: OutPoint = OutPoint {
        txid: Hash256::ZERO,
        vout: u32::MAX,
    };

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Witness stack (empty for legacy inputs)
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            prevout,
            script_sig,
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    fn encode_into(&self, enc: &mut Encoder, with_witness: bool) {
        let with_witness = with_witness && self.has_witness();
        enc.i32(self.version);
        if with_witness {
            enc.u8(0x00).u8(0x01);
        }
        enc.varint(self.inputs.len() as u64);
        for input in &self.inputs {
            enc.bytes(input.prevout.txid.as_bytes())
                .u32(input.prevout.vout)
                .var_bytes(&input.script_sig)
                .u32(input.sequence);
        }
        enc.varint(self.outputs.len() as u64);
        for output in &self.outputs {
            enc.i64(output.value).var_bytes(&output.script_pubkey);
        }
        if with_witness {
            for input in &self.inputs {
                enc.varint(input.witness.len() as u64);
                for item in &input.witness {
                    enc.var_bytes(item);
                }
            }
        }
        enc.u32(self.lock_time);
    }

    /// Serialization without witness data (what the txid commits to)
    pub fn serialize_legacy(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_into(&mut enc, false);
        enc.into_bytes()
    }

    /// Full serialization (witness included when present)
    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_into(&mut enc, true);
        enc.into_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn txid(&self) -> Hash256 {
        double_sha256(&self.serialize_legacy())
    }

    /// Size without witness data
    pub fn stripped_size(&self) -> usize {
        self.serialize_legacy().len()
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let version = dec.i32()?;
        let segwit = dec.peek(0) == Some(0x00) && dec.peek(1) == Some(0x01);
        if segwit {
            dec.take(2)?;
        }

        let input_count = dec.length()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let txid = Hash256(dec.array()?);
            let vout = dec.u32()?;
            let script_sig = dec.var_bytes()?;
            let sequence = dec.u32()?;
            inputs.push(TxIn {
                prevout: OutPoint { txid, vout },
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = dec.length()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            let value = dec.i64()?;
            let script_pubkey = dec.var_bytes()?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if segwit {
            for input in inputs.iter_mut() {
                let items = dec.length()?;
                for _ in 0..items {
                    input.witness.push(dec.var_bytes()?);
                }
            }
            if inputs.iter().all(|i| i.witness.is_empty()) {
                return Err(DecodeError::SuperfluousWitness);
            }
        }

        let lock_time = dec.u32()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(bytes);
        let tx = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(tx)
    }

    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        Self::from_bytes(&encode::decode_hex(s)?)
    }
}

/// 80-byte block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn serialize(&self) -> [u8; 80] {
        let mut enc = Encoder::with_capacity(Self::SIZE);
        enc.i32(self.version)
            .bytes(self.prev_block_hash.as_bytes())
            .bytes(self.merkle_root.as_bytes())
            .u32(self.time)
            .u32(self.bits)
            .u32(self.nonce);
        let mut out = [0u8; 80];
        out.copy_from_slice(&enc.into_bytes());
        out
    }

    pub fn hash(&self) -> Hash256 {
        double_sha256(&self.serialize())
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(BlockHeader {
            version: dec.i32()?,
            prev_block_hash: Hash256(dec.array()?),
            merkle_root: Hash256(dec.array()?),
            time: dec.u32()?,
            bits: dec.u32()?,
            nonce: dec.u32()?,
        })
    }
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Merkle root over the transaction ids and whether the list is mutated
    pub fn compute_merkle_root(&self) -> (Hash256, bool) {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(&txids)
    }

    /// Recompute and store the merkle root
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.compute_merkle_root().0;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.bytes(&self.header.serialize());
        enc.varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(&mut enc, true);
        }
        enc.into_bytes()
    }

    /// Size without witness data
    pub fn stripped_size(&self) -> usize {
        let mut enc = Encoder::new();
        enc.bytes(&self.header.serialize());
        enc.varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(&mut enc, false);
        }
        enc.len()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(bytes);
        let header = BlockHeader::decode(&mut dec)?;
        let count = dec.length()?;
        let mut transactions = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            transactions.push(Transaction::decode(&mut dec)?);
        }
        dec.finish()?;
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        Self::from_bytes(&encode::decode_hex(s)?)
    }
}

/// Block subsidy at `height` for the given halving interval
pub fn block_subsidy(height: u64, halving_interval: u64) -> i64 {
    let halvings = height / halving_interval.max(1);
    if halvings >= 64 {
        return 0;
    }
    (50 * COIN) >> halvings
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mainnet genesis block
    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c0101000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    #[test]
    fn test_genesis_block_hashes() {
        let block = Block::from_hex(GENESIS_HEX).unwrap();
        assert_eq!(
            block.hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(
            block.header.merkle_root.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(block.compute_merkle_root(), (block.header.merkle_root, false));
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.to_hex(), GENESIS_HEX);
    }

    #[test]
    fn test_segwit_transaction_round_trip() {
        let tx = Transaction {
            version: 2,
            inputs: vec![TxIn {
                prevout: OutPoint {
                    txid: double_sha256(b"prev"),
                    vout: 1,
                },
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
                witness: vec![vec![0x01, 0x02], vec![]],
            }],
            outputs: vec![TxOut {
                value: 5_000,
                script_pubkey: vec![script::OP_TRUE],
            }],
            lock_time: 0,
        };
        let decoded = Transaction::from_hex(&tx.to_hex()).unwrap();
        assert_eq!(decoded, tx);
        assert!(tx.serialize().len() > tx.stripped_size());
        assert_eq!(decoded.txid(), tx.txid());
    }

    #[test]
    fn test_hash_rpc_hex_round_trip() {
        let text = "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206";
        let hash: Hash256 = text.parse().unwrap();
        assert_eq!(hash.to_string(), text);
        assert_eq!(hash.as_bytes()[31], 0x0f);
        assert!("abcd".parse::<Hash256>().is_err());
    }

    #[test]
    fn test_subsidy_schedule() {
        assert_eq!(block_subsidy(0, 150), 50 * COIN);
        assert_eq!(block_subsidy(150, 150), 25 * COIN);
        assert_eq!(block_subsidy(150 * 64, 150), 0);
    }
}
