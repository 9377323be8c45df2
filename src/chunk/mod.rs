//! Message framing. Each message travels as one or more chunks, each
//! prefixed with its big-endian `u16` length, and ends with a `00 00`
//! marker.

pub mod reader;
pub mod writer;

pub use reader::ChunkReader;
pub use writer::ChunkWriter;
