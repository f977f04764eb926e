//! Message definitions generated from `proto/fileformat.proto` and
//! `proto/osmformat.proto` by `prost-build`.
//!
//! Optional scalar fields get generated getters (e.g.
//! [`PrimitiveBlock::granularity`]), which return the schema default when the
//! field is absent from the wire. The decoders rely on that.

include!(concat!(env!("OUT_DIR"), "/osmpbf.rs"));
