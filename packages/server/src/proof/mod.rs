pub mod builder;
pub mod handlers;
pub mod tracer;
pub mod witness;

pub use builder::{BlockRef, ProofBuilder};
pub use tracer::{CallTracer, PrestateTracer, TouchedAccount};
pub use witness::{RawTrieWitness, TrieWitness};
