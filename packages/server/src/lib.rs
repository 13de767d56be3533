//! INCUBED node server: answers Ethereum JSON-RPC requests with proofs a light
//! client can verify, and serves the registry's node list.

pub mod context;
pub mod error;
pub mod handler;
pub mod header;
pub mod nodelist;
pub mod proof;
pub mod request;
pub mod routes;
pub mod signer;
pub mod state;
pub mod transport;

pub use context::{ChainConfig, HandlerContext};
pub use error::HandlerError;
pub use handler::EthHandler;
pub use request::{ClientRequest, ClientResponse};
