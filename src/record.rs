use crate::block::Block;
use crate::codec::{Record, TypeRegistry};
use crate::message::{Message, Peer};
use crate::tx::{OutPoint, Transaction, TxIn, TxOut};

/// Every record type the node exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyRecord {
    Block(Block),
    Transaction(Transaction),
    TxIn(TxIn),
    TxOut(TxOut),
    OutPoint(OutPoint),
    Message(Message),
    Peer(Peer),
}

impl AnyRecord {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Block(_) => Block::TYPE_NAME,
            Self::Transaction(_) => Transaction::TYPE_NAME,
            Self::TxIn(_) => TxIn::TYPE_NAME,
            Self::TxOut(_) => TxOut::TYPE_NAME,
            Self::OutPoint(_) => OutPoint::TYPE_NAME,
            Self::Message(_) => Message::TYPE_NAME,
            Self::Peer(_) => Peer::TYPE_NAME,
        }
    }
}

/// Registry with every record type of [`AnyRecord`].
pub fn standard_registry() -> TypeRegistry {
    TypeRegistry::new()
        .with::<Block>()
        .with::<Transaction>()
        .with::<TxIn>()
        .with::<TxOut>()
        .with::<OutPoint>()
        .with::<Message>()
        .with::<Peer>()
}
