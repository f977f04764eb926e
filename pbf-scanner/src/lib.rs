//! Decoder for OpenStreetMap PBF files.
//!
//! A PBF file is a sequence of length-prefixed blobs, each optionally
//! zlib-compressed. The first blob holds the file header; every following blob
//! holds a primitive block of nodes, ways and relations, mostly delta coded.
//! [`Scanner`] reads the blobs on one thread, decodes them on a pool of
//! workers and hands out [`Entity`] values one at a time.
//!
//! Entities of one blob always arrive in wire order. With more than one worker,
//! entities of different blobs may interleave; use
//! [`ScanOptions::workers`]`(1)` when file order matters.

pub mod blob;
pub mod blob_reader;
pub mod decode;
pub mod delta;
pub mod entity;
mod error;
pub mod header;
pub mod info;
pub mod osm_pbf;
pub mod scanner;
pub mod strings;
pub mod tags;

pub use blob_reader::{BlobReader, RawBlob};
pub use entity::{BoundingBox, Entity, FileHeader, Info, Member, MemberType, Node, Relation, Tag, Tags, Way};
pub use error::{Error, Result};
pub use scanner::{ScanHandle, ScanOptions, ScanState, Scanner, OSM_DATA, OSM_HEADER};
