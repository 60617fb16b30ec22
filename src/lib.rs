pub mod block;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod hasher;
pub mod message;
pub mod miner;
pub mod record;
pub mod transport;
pub mod tx;

pub mod prelude {
    pub use super::block::Block;
    pub use super::codec::{Record, TypeRegistry};
    pub use super::config::{NodeConfig, TransportConfig};
    pub use super::error::*;
    pub use super::message::{Action, Message, Payload, Peer};
    pub use super::miner::{mine, CancelSignal, MineOutcome};
    pub use super::record::{standard_registry, AnyRecord};
    pub use super::transport::{Listener, SendOutcome, Transport};
    pub use super::tx::{OutPoint, Transaction, TxIn, TxOut};
}
