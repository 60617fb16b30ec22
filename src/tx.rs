use crate::codec::{self, FieldReader, FieldWriter, Record};
use crate::error::{DecodingError, EncodingError};
use crate::hasher::sha256d;
use crate::record::AnyRecord;

/// Identifies a spendable output of an earlier transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Id of the transaction holding the output.
    pub txid: String,
    /// Position of the output within that transaction.
    pub txout_idx: u32,
}

/// An input of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// The output being spent. `None` marks a coinbase input.
    pub to_spend: Option<OutPoint>,
    /// Script unlocking the spent output.
    pub signature_script: Vec<u8>,
    /// Sender-defined sequence number, allows replacing the transaction.
    pub sequence: u32,
}

impl TxIn {
    #[inline]
    pub fn coinbase(signature_script: Vec<u8>, sequence: u32) -> Self {
        Self {
            to_spend: None,
            signature_script,
            sequence,
        }
    }

    #[inline]
    pub fn is_coinbase(&self) -> bool {
        self.to_spend.is_none()
    }
}

/// An output of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub to_address: String,
}

/// Represents a transaction in the blockchain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub txins: Vec<TxIn>,
    pub txouts: Vec<TxOut>,
}

impl Transaction {
    /// Reward transaction with a single coinbase input.
    pub fn coinbase(to_address: impl Into<String>, value: u64, height: u64) -> Self {
        Self {
            // Height in the script keeps coinbase ids unique per block.
            txins: vec![TxIn::coinbase(height.to_be_bytes().to_vec(), 0)],
            txouts: vec![TxOut {
                value,
                to_address: to_address.into(),
            }],
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txins.len() == 1 && self.txins[0].is_coinbase()
    }

    /// Double hash of the canonical encoding.
    pub fn id(&self) -> Result<String, EncodingError> {
        Ok(sha256d(codec::encode(self)?))
    }
}

impl Record for OutPoint {
    const TYPE_NAME: &'static str = "OutPoint";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.str("txid", &self.txid);
        fields.int("txout_idx", self.txout_idx);

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            txid: fields.str("txid")?,
            txout_idx: fields.uint("txout_idx")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::OutPoint(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::OutPoint(outpoint) => Ok(outpoint),
            other => Err(other),
        }
    }
}

impl Record for TxIn {
    const TYPE_NAME: &'static str = "TxIn";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.optional_record("to_spend", self.to_spend.as_ref())?;
        fields.bytes("signature_script", &self.signature_script);
        fields.int("sequence", self.sequence);

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            to_spend: fields.optional_record("to_spend")?,
            signature_script: fields.bytes("signature_script")?,
            sequence: fields.uint("sequence")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::TxIn(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::TxIn(txin) => Ok(txin),
            other => Err(other),
        }
    }
}

impl Record for TxOut {
    const TYPE_NAME: &'static str = "TxOut";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.int("value", self.value);
        fields.str("to_address", &self.to_address);

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            value: fields.uint("value")?,
            to_address: fields.str("to_address")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::TxOut(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::TxOut(txout) => Ok(txout),
            other => Err(other),
        }
    }
}

impl Record for Transaction {
    const TYPE_NAME: &'static str = "Transaction";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.records("txins", &self.txins)?;
        fields.records("txouts", &self.txouts)?;

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            txins: fields.records("txins")?,
            txouts: fields.records("txouts")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Transaction(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::Transaction(tx) => Ok(tx),
            other => Err(other),
        }
    }
}
