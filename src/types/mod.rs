//! Values carried in statement parameters and result records.

mod value;

pub use value::{
    BoltDict, BoltNode, BoltPath, BoltRelationship, BoltStructure, BoltUnboundRelationship,
    BoltValue,
};

/// PackStream structure tag bytes for the graph types the driver decodes.
pub mod tag {
    pub const NODE: u8 = 0x4E;
    pub const RELATIONSHIP: u8 = 0x52;
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub const PATH: u8 = 0x50;
}
