use serde_json::Number;

use crate::codec::{FieldReader, FieldWriter, Record};
use crate::error::{DecodingError, EncodingError};
use crate::hasher::sha256d;
use crate::record::AnyRecord;
use crate::tx::Transaction;

/// Seconds since the epoch. Integral and fractional values keep their form,
/// both in the canonical text and in the header.
pub type Timestamp = Number;

/// Represents a block in the blockchain.
///
/// Blocks are never updated in place: [`Block::with_nonce`] returns a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Id of the parent block, empty for genesis.
    pub prev_block_hash: String,
    /// Merkle root of the transactions in the block.
    pub merkle_hash: String,
    /// Unix timestamp of when the block was created.
    pub timestamp: Timestamp,
    /// Number of leading zero bits the block id must have.
    pub bits: u32,
    /// Proof-of-work search variable.
    pub nonce: u64,
    /// The list of transactions included in the block.
    pub txns: Vec<Transaction>,
}

impl Block {
    /// Candidate block at nonce 0 with its merkle hash computed.
    pub fn new(
        prev_block_hash: impl Into<String>,
        txns: Vec<Transaction>,
        timestamp: impl Into<Timestamp>,
        bits: u32,
    ) -> Result<Self, EncodingError> {
        Ok(Self {
            prev_block_hash: prev_block_hash.into(),
            merkle_hash: merkle_root(&txns)?,
            timestamp: timestamp.into(),
            bits,
            nonce: 0,
            txns,
        })
    }

    /// Header text hashed for the given nonce.
    pub fn header(&self, nonce: u64) -> String {
        format!(
            "{}{}{}{}{}",
            self.prev_block_hash,
            self.merkle_hash,
            self.timestamp,
            self.bits,
            nonce
        )
    }

    #[inline]
    pub fn id(&self) -> String {
        sha256d(self.header(self.nonce))
    }

    #[inline]
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Copy of the block with another nonce.
    pub fn with_nonce(&self, nonce: u64) -> Self {
        Self {
            nonce,
            ..self.clone()
        }
    }
}

/// Merkle root over transaction ids. Odd nodes are carried up unchanged.
pub fn merkle_root(txns: &[Transaction]) -> Result<String, EncodingError> {
    if txns.is_empty() {
        return Ok(String::new());
    }

    let mut leaves = txns.iter()
        .map(Transaction::id)
        .collect::<Result<Vec<_>, _>>()?;

    while leaves.len() > 1 {
        leaves = leaves.chunks(2)
            .map(|pair| match pair {
                [left, right] => sha256d(format!("{left}{right}")),
                _ => pair[0].clone(),
            })
            .collect();
    }

    Ok(leaves.swap_remove(0))
}

impl Record for Block {
    const TYPE_NAME: &'static str = "Block";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.str("prev_block_hash", &self.prev_block_hash);
        fields.str("merkle_hash", &self.merkle_hash);
        fields.number("timestamp", self.timestamp.clone());
        fields.int("bits", self.bits);
        fields.int("nonce", self.nonce);
        fields.records("txns", &self.txns)?;

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            prev_block_hash: fields.str("prev_block_hash")?,
            merkle_hash: fields.str("merkle_hash")?,
            timestamp: fields.number("timestamp")?,
            bits: fields.uint("bits")?,
            nonce: fields.uint("nonce")?,
            txns: fields.records("txns")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Block(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::Block(block) => Ok(block),
            other => Err(other),
        }
    }
}
