use std::io::Read;

use prost::Message;
use tracing::{debug, span, trace, Level};

use crate::error::{Error, Result};
use crate::osm_pbf;

/// Largest `BlobHeader` a well-formed file may contain.
pub const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;
/// Largest `Blob` a well-formed file may contain, on the wire or inflated.
pub const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;

/// One frame pulled off the stream, still compressed.
#[derive(Debug, Clone)]
pub struct RawBlob {
    pub header: osm_pbf::BlobHeader,
    pub blob: osm_pbf::Blob,
    /// Bytes the frame occupied on the wire: length prefix, header and data.
    pub bytes: u64,
}

impl RawBlob {
    pub fn kind(&self) -> &str {
        &self.header.r#type
    }
}

/// Reads length-delimited frames off a sequential byte stream.
///
/// Each frame is `[u32 big-endian header length][BlobHeader][Blob]`. There is
/// exactly one cursor, so a reader must only ever be driven from one thread.
#[derive(Debug)]
pub struct BlobReader<R: Read> {
    stream: R,
    offset: u64,
}

impl<R: Read> BlobReader<R> {
    pub fn new(stream: R) -> Self {
        Self { stream, offset: 0 }
    }

    /// Stream offset of the next frame.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Reads the next frame, or `None` when fewer than four bytes of the next
    /// length prefix remain. Such trailing bytes are ignored.
    pub fn next_blob(&mut self) -> Result<Option<RawBlob>> {
        let _span = span!(Level::TRACE, "read_blob", offset = self.offset).entered();

        let size_buf = self.read_up_to(4)?;
        if size_buf.len() < 4 {
            if !size_buf.is_empty() {
                debug!("Ignoring {} trailing bytes at offset {}", size_buf.len(), self.offset);
            }
            trace!("End of stream");
            return Ok(None);
        }
        let header_size = u32::from_be_bytes([size_buf[0], size_buf[1], size_buf[2], size_buf[3]]) as usize;
        trace!("Header size: {}", header_size);
        if header_size > MAX_BLOB_HEADER_SIZE {
            return Err(Error::Framing(format!(
                "blob header of {} bytes exceeds the {} byte limit",
                header_size, MAX_BLOB_HEADER_SIZE
            )));
        }

        let header_buf = self.read_exactly(header_size, "blob header")?;
        let header = osm_pbf::BlobHeader::decode(&header_buf[..])?;
        trace!("Decoded BlobHeader: type={} datasize={}", header.r#type, header.datasize);

        let datasize = usize::try_from(header.datasize)
            .map_err(|_| Error::Framing(format!("negative blob size {}", header.datasize)))?;
        if datasize > MAX_BLOB_SIZE {
            return Err(Error::Framing(format!(
                "blob of {} bytes exceeds the {} byte limit",
                datasize, MAX_BLOB_SIZE
            )));
        }

        let data_buf = self.read_exactly(datasize, "blob")?;
        let blob = osm_pbf::Blob::decode(&data_buf[..])?;

        let bytes = (4 + header_size + datasize) as u64;
        self.offset += bytes;
        Ok(Some(RawBlob { header, blob, bytes }))
    }

    fn read_exactly(&mut self, len: usize, what: &str) -> Result<Vec<u8>> {
        let buf = self.read_up_to(len)?;
        if buf.len() < len {
            return Err(Error::Framing(format!(
                "truncated {}: expected {} bytes, stream ended after {}",
                what,
                len,
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Reads until `len` bytes were collected or the stream ended.
    fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(MAX_BLOB_HEADER_SIZE));
        (&mut self.stream).take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<RawBlob>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_blob().transpose()
    }
}

/// Builds the wire form of one frame. Used to assemble streams in tests.
#[cfg(test)]
pub(crate) fn encode_frame(kind: &str, blob: &osm_pbf::Blob) -> Vec<u8> {
    let data = blob.encode_to_vec();
    let header = osm_pbf::BlobHeader {
        r#type: kind.to_string(),
        indexdata: None,
        datasize: data.len() as i32,
    }
    .encode_to_vec();
    let mut out = (header.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(&data);
    out
}
