use std::fmt;
use std::str::FromStr;

use serde_json::Value as Json;

use crate::block::Block;
use crate::codec::{self, FieldReader, FieldWriter, Record};
use crate::error::{ConfigError, DecodingError, EncodingError};
use crate::record::AnyRecord;
use crate::tx::Transaction;

/// A network endpoint. Peers carry no identity beyond their address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    #[inline]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Peer {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidPeer(value.to_string());

        let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port: port.parse().map_err(|_| invalid())?,
        })
    }
}

/// Peer protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    /// Ask for the blocks following the attached tip.
    BlockSyncReq = 0,
    /// Chain segment answering a sync request.
    BlockSyncGet = 1,
    /// A new transaction.
    TxRev = 2,
    /// A newly mined block.
    BlockRev = 3,
    PeersReq = 4,
    PeersGet = 5,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockSyncReq => "block_sync_req",
            Self::BlockSyncGet => "block_sync_get",
            Self::TxRev => "tx_rev",
            Self::BlockRev => "block_rev",
            Self::PeersReq => "peers_req",
            Self::PeersGet => "peers_get",
        }
    }

    /// Payload shape this action travels with.
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            Self::BlockSyncReq | Self::BlockRev => PayloadKind::Block,
            Self::BlockSyncGet => PayloadKind::Blocks,
            Self::TxRev => PayloadKind::Transaction,
            Self::PeersReq => PayloadKind::Empty,
            Self::PeersGet => PayloadKind::Peers,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::BlockSyncReq),
            1 => Ok(Self::BlockSyncGet),
            2 => Ok(Self::TxRev),
            3 => Ok(Self::BlockRev),
            4 => Ok(Self::PeersReq),
            5 => Ok(Self::PeersGet),
            other => Err(other),
        }
    }
}

impl fmt::Display for Action {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Empty,
    Block,
    Transaction,
    Blocks,
    Peers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Block(Block),
    Transaction(Transaction),
    Blocks(Vec<Block>),
    Peers(Vec<Peer>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Empty => PayloadKind::Empty,
            Self::Block(_) => PayloadKind::Block,
            Self::Transaction(_) => PayloadKind::Transaction,
            Self::Blocks(_) => PayloadKind::Blocks,
            Self::Peers(_) => PayloadKind::Peers,
        }
    }

    fn to_json(&self) -> Result<Json, EncodingError> {
        match self {
            Self::Empty => Ok(Json::Null),
            Self::Block(block) => codec::to_value(block),
            Self::Transaction(tx) => codec::to_value(tx),
            Self::Blocks(blocks) => codec::to_array(blocks),
            Self::Peers(peers) => codec::to_array(peers),
        }
    }
}

/// A single unit of the peer protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub action: Action,
    pub data: Payload,
    /// Listening port of the sender, so the receiver can answer.
    pub port: u16,
}

impl Message {
    #[inline]
    pub fn new(action: Action, data: Payload, port: u16) -> Self {
        Self {
            action,
            data,
            port,
        }
    }
}

impl Record for Peer {
    const TYPE_NAME: &'static str = "Peer";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.str("host", &self.host);
        fields.int("port", self.port);

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            host: fields.str("host")?,
            port: fields.uint("port")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Peer(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::Peer(peer) => Ok(peer),
            other => Err(other),
        }
    }
}

impl Record for Message {
    const TYPE_NAME: &'static str = "Message";

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError> {
        fields.int("action", self.action as u8);
        fields.value("data", self.data.to_json()?);
        fields.int("port", self.port);

        Ok(())
    }

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError> {
        let code: u8 = fields.uint("action")?;

        let action = Action::try_from(code)
            .map_err(|code| fields.invalid("action", format!("unknown action {code}")))?;

        let registry = fields.registry();
        let data = fields.value("data")?;

        let data = match (action.payload_kind(), data) {
            (PayloadKind::Empty, Json::Null) => Payload::Empty,
            (PayloadKind::Block, data @ Json::Object(_)) => Payload::Block(registry.decode_value_as(data)?),
            (PayloadKind::Transaction, data @ Json::Object(_)) => Payload::Transaction(registry.decode_value_as(data)?),

            (PayloadKind::Blocks, Json::Array(values)) => Payload::Blocks(values.into_iter()
                .map(|value| registry.decode_value_as(value))
                .collect::<Result<Vec<Block>, _>>()?),

            (PayloadKind::Peers, Json::Array(values)) => Payload::Peers(values.into_iter()
                .map(|value| registry.decode_value_as(value))
                .collect::<Result<Vec<Peer>, _>>()?),

            (kind, other) => return Err(fields.invalid(
                "data",
                format!("{action} expects {kind:?} payload, got {other}"),
            )),
        };

        Ok(Self {
            action,
            data,
            port: fields.uint("port")?,
        })
    }

    fn into_any(self) -> AnyRecord {
        AnyRecord::Message(self)
    }

    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord> {
        match record {
            AnyRecord::Message(message) => Ok(message),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::record::standard_registry;

    #[test]
    fn parse_peer() {
        assert_eq!("127.0.0.1:9999".parse::<Peer>().unwrap(), Peer::new("127.0.0.1", 9999));
        assert_eq!("node.local:1".parse::<Peer>().unwrap().to_string(), "node.local:1");

        assert!("127.0.0.1".parse::<Peer>().is_err());
        assert!(":80".parse::<Peer>().is_err());
        assert!("host:99999".parse::<Peer>().is_err());
    }

    #[test]
    fn action_codes() {
        for code in 0..=5u8 {
            assert_eq!(Action::try_from(code).unwrap() as u8, code);
        }

        assert_eq!(Action::try_from(6), Err(6));
    }

    #[test]
    fn messages_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let registry = standard_registry();
        let block = Block::new("", vec![Transaction::coinbase("1miner", 50, 0)], 1, 8)?;

        let messages = [
            Message::new(Action::PeersReq, Payload::Empty, 9999),
            Message::new(Action::BlockRev, Payload::Block(block.clone()), 9999),
            Message::new(Action::BlockSyncGet, Payload::Blocks(vec![block.clone(), block]), 1),
            Message::new(Action::BlockSyncGet, Payload::Blocks(Vec::new()), 1),
            Message::new(Action::TxRev, Payload::Transaction(Transaction::coinbase("a", 1, 1)), 2),
            Message::new(Action::PeersGet, Payload::Peers(vec![Peer::new("10.0.0.1", 9000)]), 3),
        ];

        for message in messages {
            assert_eq!(message.data.kind(), message.action.payload_kind());

            let text = codec::encode(&message)?;

            assert_eq!(codec::decode_as::<Message>(&text, &registry)?, message);
        }

        Ok(())
    }

    #[test]
    fn payload_must_match_action() -> Result<(), EncodingError> {
        let text = codec::encode(&Message::new(Action::BlockRev, Payload::Empty, 1))?;

        assert!(matches!(
            codec::decode(&text, &standard_registry()),
            Err(DecodingError::InvalidField { record: "Message", field: "data", .. })
        ));

        Ok(())
    }

    #[test]
    fn unknown_action() {
        let text = r#"{"_type":"Message","action":42,"data":null,"port":1}"#;

        assert!(matches!(
            codec::decode(text, &standard_registry()),
            Err(DecodingError::InvalidField { field: "action", .. })
        ));
    }
}
