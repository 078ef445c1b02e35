#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod bitcoind;
pub mod bootstrap;
pub mod cln;
pub mod descriptor;
pub mod error;
pub mod launch;
pub mod lnd;
pub mod network;
pub mod probe;
pub mod stack;
mod utils;

pub use bitcoind::{BitcoindConfig, BitcoindNode};
pub use cln::{ClnConfig, ClnNode, ClnRestClient};
pub use descriptor::NodeDescriptor;
pub use error::{Error, Result};
pub use launch::{launch, FailurePolicy, NodeHandle};
pub use lnd::{LndConfig, LndGrpc, LndNode, MacaroonInterceptor};
pub use network::Fabric;
pub use stack::{Stack, StackBuilder};
pub use utils::unique_name;
