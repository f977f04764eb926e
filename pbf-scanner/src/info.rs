use crate::decode::BlockContext;
use crate::delta::DeltaState;
use crate::entity::Info;
use crate::error::{Error, Result};
use crate::osm_pbf;

/// Decodes the metadata of a node, way or relation. Absent metadata decodes to
/// [`Info::default`].
pub fn decode_info(info: Option<&osm_pbf::Info>, ctx: &BlockContext<'_>) -> Result<Info> {
    let Some(info) = info else {
        return Ok(Info::default());
    };
    Ok(Info {
        version: info.version(),
        visible: info.visible.unwrap_or(true),
        user: ctx.strings.get(info.user_sid())?,
        user_id: info.uid(),
        changeset: info.changeset(),
        timestamp: ctx.timestamp(info.timestamp()),
    })
}

/// Decodes row `i` of a dense info table.
///
/// `version` and `visible` are plain columns; `user_sid`, `uid`, `timestamp` and
/// `changeset` are delta coded against `state`. An empty column decodes to its
/// default for every row, a column shorter than `i + 1` is an error. Without a
/// user column every row resolves string 0.
pub fn decode_dense_info(
    i: usize,
    info: Option<&osm_pbf::DenseInfo>,
    ctx: &BlockContext<'_>,
    state: &mut DeltaState,
) -> Result<Info> {
    let Some(info) = info else {
        return Ok(Info::default());
    };

    let version = column(&info.version, i, "version")?.unwrap_or(0);
    let visible = column(&info.visible, i, "visible")?.unwrap_or(true);

    let user_sid = column(&info.user_sid, i, "user sid")?.map_or(0, |delta| state.user_sid.apply(delta));
    let user = ctx.strings.get(user_sid)?;
    let user_id = column(&info.uid, i, "uid")?.map_or(0, |delta| state.uid.apply(delta));
    let changeset = column(&info.changeset, i, "changeset")?.map_or(0, |delta| state.changeset.apply(delta));
    let timestamp = column(&info.timestamp, i, "timestamp")?.map_or(0, |delta| state.timestamp.apply(delta));

    Ok(Info {
        version,
        visible,
        user,
        user_id,
        changeset,
        timestamp: ctx.timestamp(timestamp),
    })
}

/// Row `i` of an optional column: `None` when the column is empty.
fn column<T: Copy>(values: &[T], i: usize, field: &'static str) -> Result<Option<T>> {
    if values.is_empty() {
        return Ok(None);
    }
    values.get(i).copied().map(Some).ok_or_else(|| Error::consistency(field, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn block() -> osm_pbf::PrimitiveBlock {
        osm_pbf::PrimitiveBlock {
            stringtable: Some(osm_pbf::StringTable {
                s: vec![b"".to_vec(), b"alice".to_vec(), b"bob".to_vec()],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn absent_info_is_default() {
        let block = block();
        let ctx = BlockContext::new(&block);
        assert_eq!(decode_info(None, &ctx).unwrap(), Info::default());
        let mut state = DeltaState::default();
        assert_eq!(decode_dense_info(3, None, &ctx, &mut state).unwrap(), Info::default());
    }

    #[test]
    fn decodes_explicit_info() {
        let block = block();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::Info {
            version: Some(3),
            timestamp: Some(1_500_000),
            changeset: Some(99),
            uid: Some(17),
            user_sid: Some(2),
            visible: None,
        };
        let decoded = decode_info(Some(&info), &ctx).unwrap();
        assert_eq!(decoded.version, 3);
        assert!(decoded.visible);
        assert_eq!(decoded.user, "bob");
        assert_eq!(decoded.user_id, 17);
        assert_eq!(decoded.changeset, 99);
        // Default date granularity is one second.
        assert_eq!(decoded.timestamp, SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000));
    }

    #[test]
    fn explicit_user_out_of_range_is_an_error() {
        let block = block();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::Info {
            user_sid: Some(5),
            ..Default::default()
        };
        assert!(matches!(decode_info(Some(&info), &ctx), Err(Error::Bounds { index: 5, len: 3 })));
    }

    #[test]
    fn dense_columns_are_delta_coded() {
        let block = block();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::DenseInfo {
            version: vec![1, 4],
            timestamp: vec![100, 20],
            changeset: vec![10, 1],
            uid: vec![5, -2],
            user_sid: vec![1, 1],
            visible: vec![true, false],
        };
        let mut state = DeltaState::default();

        let first = decode_dense_info(0, Some(&info), &ctx, &mut state).unwrap();
        assert_eq!((first.version, first.visible), (1, true));
        assert_eq!((first.user.as_str(), first.user_id, first.changeset), ("alice", 5, 10));
        assert_eq!(first.timestamp, SystemTime::UNIX_EPOCH + Duration::from_secs(100));

        let second = decode_dense_info(1, Some(&info), &ctx, &mut state).unwrap();
        assert_eq!((second.version, second.visible), (4, false));
        assert_eq!((second.user.as_str(), second.user_id, second.changeset), ("bob", 3, 11));
        assert_eq!(second.timestamp, SystemTime::UNIX_EPOCH + Duration::from_secs(120));
    }

    #[test]
    fn empty_dense_columns_fall_back_to_defaults() {
        let block = block();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::DenseInfo::default();
        let mut state = DeltaState::default();
        let decoded = decode_dense_info(7, Some(&info), &ctx, &mut state).unwrap();
        assert_eq!(decoded, Info::default());
    }

    #[test]
    fn present_info_needs_a_string_table() {
        let block = osm_pbf::PrimitiveBlock::default();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::Info::default();
        assert!(matches!(decode_info(Some(&info), &ctx), Err(Error::MissingStringTable)));

        let dense = osm_pbf::DenseInfo {
            version: vec![1],
            ..Default::default()
        };
        let mut state = DeltaState::default();
        let err = decode_dense_info(0, Some(&dense), &ctx, &mut state).unwrap_err();
        assert!(matches!(err, Error::MissingStringTable));

        assert_eq!(decode_info(None, &ctx).unwrap(), Info::default());
    }

    #[test]
    fn short_dense_column_is_an_error() {
        let block = block();
        let ctx = BlockContext::new(&block);
        let info = osm_pbf::DenseInfo {
            uid: vec![1],
            ..Default::default()
        };
        let mut state = DeltaState::default();
        assert!(decode_dense_info(0, Some(&info), &ctx, &mut state).is_ok());
        let err = decode_dense_info(1, Some(&info), &ctx, &mut state).unwrap_err();
        assert!(matches!(err, Error::Consistency { field: "uid", index: 1 }));
    }
}
