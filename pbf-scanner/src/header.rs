use std::time::{Duration, SystemTime};

use tracing::{span, trace, Level};

use crate::blob;
use crate::entity::{BoundingBox, FileHeader};
use crate::error::Result;
use crate::osm_pbf;

const NANO: f64 = 1e-9;

/// Decompresses and decodes the `OSMHeader` blob of a stream.
pub fn decode_header(blob: &osm_pbf::Blob) -> Result<FileHeader> {
    let _span = span!(Level::TRACE, "decode_header").entered();

    let block = blob::header_block(blob)?;
    trace!("Decoded HeaderBlock: {:?}", block);
    Ok(file_header(block))
}

fn file_header(block: osm_pbf::HeaderBlock) -> FileHeader {
    let replication_timestamp = block.osmosis_replication_timestamp.and_then(|secs| {
        let offset = Duration::from_secs(secs.unsigned_abs());
        if secs >= 0 {
            SystemTime::UNIX_EPOCH.checked_add(offset)
        } else {
            SystemTime::UNIX_EPOCH.checked_sub(offset)
        }
    });
    let bounding_box = block.bbox.as_ref().map(|bbox| BoundingBox {
        top: NANO * bbox.top as f64,
        bottom: NANO * bbox.bottom as f64,
        left: NANO * bbox.left as f64,
        right: NANO * bbox.right as f64,
    });

    FileHeader {
        writing_program: block.writingprogram().to_string(),
        source: block.source().to_string(),
        replication_sequence_number: block.osmosis_replication_sequence_number(),
        replication_base_url: block.osmosis_replication_base_url().to_string(),
        required_features: block.required_features,
        optional_features: block.optional_features,
        replication_timestamp,
        bounding_box,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm_pbf::blob::Data;
    use prost::Message;

    #[test]
    fn empty_header_decodes_to_defaults() {
        let blob = osm_pbf::Blob {
            raw_size: None,
            data: Some(Data::Raw(Vec::new())),
        };
        assert_eq!(decode_header(&blob).unwrap(), FileHeader::default());
    }

    #[test]
    fn decodes_every_field() {
        let block = osm_pbf::HeaderBlock {
            bbox: Some(osm_pbf::HeaderBBox {
                left: -1_500_000_000,
                right: 2_250_000_000,
                top: 51_000_000_000,
                bottom: 50_500_000_000,
            }),
            required_features: vec!["OsmSchema-V0.6".into(), "DenseNodes".into()],
            optional_features: vec!["Sort.Type_then_ID".into()],
            writingprogram: Some("osmium/1.16".into()),
            source: Some("planet".into()),
            osmosis_replication_timestamp: Some(1_700_000_000),
            osmosis_replication_sequence_number: Some(4242),
            osmosis_replication_base_url: Some("https://planet.example/replication".into()),
        };
        let blob = crate::blob::zlib_blob(&block.encode_to_vec());
        let header = decode_header(&blob).unwrap();

        assert_eq!(header.required_features, ["OsmSchema-V0.6", "DenseNodes"]);
        assert_eq!(header.optional_features, ["Sort.Type_then_ID"]);
        assert_eq!(header.writing_program, "osmium/1.16");
        assert_eq!(header.source, "planet");
        assert_eq!(header.replication_sequence_number, 4242);
        assert_eq!(header.replication_base_url, "https://planet.example/replication");
        assert_eq!(
            header.replication_timestamp,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );

        let bbox = header.bounding_box.unwrap();
        assert!((bbox.left + 1.5).abs() < 1e-9);
        assert!((bbox.right - 2.25).abs() < 1e-9);
        assert!((bbox.top - 51.0).abs() < 1e-9);
        assert!((bbox.bottom - 50.5).abs() < 1e-9);
        assert!(header.unsupported_features().is_empty());
    }

    #[test]
    fn corrupt_header_is_an_unmarshal_error() {
        let blob = osm_pbf::Blob {
            raw_size: None,
            data: Some(Data::Raw(vec![0xff, 0xff, 0xff])),
        };
        assert!(matches!(decode_header(&blob), Err(crate::error::Error::Unmarshal(_))));
    }
}
