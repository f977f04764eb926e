use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;
use prost::Message;
use tracing::{span, trace, Level};

use crate::blob_reader::MAX_BLOB_SIZE;
use crate::error::{Error, Result};
use crate::osm_pbf::{self, blob::Data};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Zlib,
    Lzma,
    ObsoleteBzip2,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn of(blob: &osm_pbf::Blob) -> Option<Self> {
        Some(match blob.data.as_ref()? {
            Data::Raw(_) => CompressionType::None,
            Data::ZlibData(_) => CompressionType::Zlib,
            Data::LzmaData(_) => CompressionType::Lzma,
            Data::ObsoleteBzip2Data(_) => CompressionType::ObsoleteBzip2,
            Data::Lz4Data(_) => CompressionType::Lz4,
            Data::ZstdData(_) => CompressionType::Zstd,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Zlib => "zlib",
            CompressionType::Lzma => "lzma",
            CompressionType::ObsoleteBzip2 => "bzip2",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

/// Returns the uncompressed payload of a blob.
///
/// Raw payloads are borrowed as-is. Zlib payloads are inflated and must come
/// out at exactly the declared `raw_size`.
pub fn data(blob: &osm_pbf::Blob) -> Result<Cow<'_, [u8]>> {
    match &blob.data {
        Some(Data::Raw(raw)) => Ok(Cow::Borrowed(raw)),
        Some(Data::ZlibData(compressed)) => inflate(compressed, blob.raw_size()).map(Cow::Owned),
        Some(_) => {
            let kind = CompressionType::of(blob).unwrap_or(CompressionType::None);
            Err(Error::UnsupportedCompression(kind.name()))
        }
        None => Err(Error::Decompression("blob carries no payload".to_string())),
    }
}

fn inflate(compressed: &[u8], raw_size: i32) -> Result<Vec<u8>> {
    let _span = span!(Level::TRACE, "inflate", compressed = compressed.len(), raw_size).entered();

    let declared = usize::try_from(raw_size)
        .map_err(|_| Error::Decompression(format!("negative raw size {}", raw_size)))?;
    if declared > MAX_BLOB_SIZE {
        return Err(Error::Decompression(format!(
            "raw size of {} bytes exceeds the {} byte limit",
            declared, MAX_BLOB_SIZE
        )));
    }
    let mut out = Vec::with_capacity(declared);
    // One byte past the declared size is enough to detect a lying header.
    ZlibDecoder::new(compressed)
        .take(declared as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| Error::Decompression(err.to_string()))?;
    if out.len() != declared {
        return Err(Error::SizeMismatch { declared, actual: out.len() });
    }
    trace!("Inflated {} bytes into {}", compressed.len(), out.len());
    Ok(out)
}

/// Decompresses and decodes an `OSMHeader` blob.
pub fn header_block(blob: &osm_pbf::Blob) -> Result<osm_pbf::HeaderBlock> {
    let data = data(blob)?;
    Ok(osm_pbf::HeaderBlock::decode(&data[..])?)
}

/// Decompresses and decodes an `OSMData` blob.
pub fn block(blob: &osm_pbf::Blob) -> Result<osm_pbf::PrimitiveBlock> {
    let data = data(blob)?;
    Ok(osm_pbf::PrimitiveBlock::decode(&data[..])?)
}

/// Wraps `payload` in a zlib-compressed blob. Used to assemble streams in tests.
#[cfg(test)]
pub(crate) fn zlib_blob(payload: &[u8]) -> osm_pbf::Blob {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    osm_pbf::Blob {
        raw_size: Some(payload.len() as i32),
        data: Some(Data::ZlibData(encoder.finish().unwrap())),
    }
}
