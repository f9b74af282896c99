mod node;
pub mod persist;
mod store;

pub use node::{
    content_hash, stable_id, CalleeRef, CallsiteRecord, Edge, EdgeType, Node, NodeKind,
};
pub use persist::{IndexMeta, NodeText};
pub use store::ProgramGraph;
