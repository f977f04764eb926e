use crate::entity::{Tag, Tags};
use crate::error::{Error, Result};
use crate::strings::Strings;

/// Decodes the parallel key/value index columns of a node, way or relation.
pub fn decode_tags(keys: &[u32], vals: &[u32], strings: &Strings<'_>) -> Result<Tags> {
    strings.require()?;
    keys.iter()
        .enumerate()
        .map(|(i, &key)| {
            let value = *vals.get(i).ok_or_else(|| Error::consistency("tag value", i))?;
            Ok(Tag {
                key: strings.get(key)?,
                value: strings.get(value)?,
            })
        })
        .collect()
}

/// Decodes one dense node's tags from the group-wide `keys_vals` column.
///
/// Reads key/value pairs from `*cursor` until a zero key or the end of the
/// column, leaving the cursor on the next node's first entry.
pub fn decode_dense_tags(keys_vals: &[i32], strings: &Strings<'_>, cursor: &mut usize) -> Result<Tags> {
    strings.require()?;
    let mut tags = Tags::new();
    while let Some(&key) = keys_vals.get(*cursor) {
        *cursor += 1;
        if key == 0 {
            break;
        }
        let value = *keys_vals
            .get(*cursor)
            .ok_or_else(|| Error::consistency("dense tag value", *cursor))?;
        *cursor += 1;
        tags.push(Tag {
            key: strings.get(key)?,
            value: strings.get(value)?,
        });
    }
    Ok(tags)
}
