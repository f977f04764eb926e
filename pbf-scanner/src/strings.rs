use crate::error::{Error, Result};
use crate::osm_pbf;

/// Block-scoped string table. Tags, users and roles refer to it by index.
#[derive(Debug, Clone, Copy)]
pub struct Strings<'a> {
    table: Option<&'a [Vec<u8>]>,
}

impl<'a> Strings<'a> {
    pub fn new(block: &'a osm_pbf::PrimitiveBlock) -> Self {
        Self {
            table: block.stringtable.as_ref().map(|table| table.s.as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.table.map_or(0, <[Vec<u8>]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with [`Error::MissingStringTable`] if the block carries no table.
    /// Tag and info decoding call this up front, even with nothing to resolve.
    pub fn require(&self) -> Result<&'a [Vec<u8>]> {
        self.table.ok_or(Error::MissingStringTable)
    }

    /// Resolves `index`. A block without a string table cannot resolve anything.
    ///
    /// Strings are decoded lossily: invalid UTF-8 sequences become
    /// `U+FFFD REPLACEMENT CHARACTER` rather than failing the block.
    pub fn get(&self, index: impl Into<i64>) -> Result<String> {
        let index = index.into();
        let table = self.require()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| table.get(i))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .ok_or(Error::Bounds { index, len: table.len() })
    }
}
