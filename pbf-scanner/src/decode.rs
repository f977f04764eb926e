//! Turns a decoded [`osm_pbf::PrimitiveBlock`] into [`Entity`] values.

use std::time::{Duration, SystemTime};

use crate::delta::{delta_decoded, Delta, DeltaState};
use crate::entity::{Entity, Member, MemberType, Node, Relation, Way};
use crate::error::{Error, Result};
use crate::info::{decode_dense_info, decode_info};
use crate::osm_pbf::{self, relation::MemberType as WireMemberType};
use crate::strings::Strings;
use crate::tags::{decode_dense_tags, decode_tags};

const NANO: f64 = 1e-9;

/// Block-wide parameters every entity decoder needs.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub strings: Strings<'a>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
}

impl<'a> BlockContext<'a> {
    pub fn new(block: &'a osm_pbf::PrimitiveBlock) -> Self {
        Self {
            strings: Strings::new(block),
            granularity: i64::from(block.granularity()),
            lat_offset: block.lat_offset(),
            lon_offset: block.lon_offset(),
            date_granularity: i64::from(block.date_granularity()),
        }
    }

    /// Degrees of a raw latitude.
    pub fn latitude(&self, raw: i64) -> f64 {
        NANO * self.lat_offset.wrapping_add(self.granularity.wrapping_mul(raw)) as f64
    }

    /// Degrees of a raw longitude.
    pub fn longitude(&self, raw: i64) -> f64 {
        NANO * self.lon_offset.wrapping_add(self.granularity.wrapping_mul(raw)) as f64
    }

    /// Instant of a raw timestamp, counted in date-granularity units since the epoch.
    pub fn timestamp(&self, raw: i64) -> SystemTime {
        let millis = raw.saturating_mul(self.date_granularity);
        let offset = Duration::from_millis(millis.unsigned_abs());
        let instant = if millis >= 0 {
            SystemTime::UNIX_EPOCH.checked_add(offset)
        } else {
            SystemTime::UNIX_EPOCH.checked_sub(offset)
        };
        instant.unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

// --------------------------------------------------------------------------
// Explicit records

pub fn decode_node(node: &osm_pbf::Node, ctx: &BlockContext<'_>) -> Result<Node> {
    Ok(Node {
        id: node.id,
        latitude: ctx.latitude(node.lat),
        longitude: ctx.longitude(node.lon),
        tags: decode_tags(&node.keys, &node.vals, &ctx.strings)?,
        info: decode_info(node.info.as_ref(), ctx)?,
    })
}

/// Node references are delta coded within each way.
pub fn decode_way(way: &osm_pbf::Way, ctx: &BlockContext<'_>) -> Result<Way> {
    Ok(Way {
        id: way.id,
        node_ids: delta_decoded(way.refs.iter().copied()).collect(),
        tags: decode_tags(&way.keys, &way.vals, &ctx.strings)?,
        info: decode_info(way.info.as_ref(), ctx)?,
    })
}

pub fn decode_relation(relation: &osm_pbf::Relation, ctx: &BlockContext<'_>) -> Result<Relation> {
    Ok(Relation {
        id: relation.id,
        members: decode_members(relation, ctx)?,
        tags: decode_tags(&relation.keys, &relation.vals, &ctx.strings)?,
        info: decode_info(relation.info.as_ref(), ctx)?,
    })
}

/// Member ids are delta coded; types and roles are parallel columns.
fn decode_members(relation: &osm_pbf::Relation, ctx: &BlockContext<'_>) -> Result<Vec<Member>> {
    let mut id = Delta::default();
    relation
        .memids
        .iter()
        .enumerate()
        .map(|(i, &delta)| {
            let raw_type = *relation.types.get(i).ok_or_else(|| Error::consistency("member type", i))?;
            let member_type = match WireMemberType::try_from(raw_type) {
                Ok(WireMemberType::Node) => MemberType::Node,
                Ok(WireMemberType::Way) => MemberType::Way,
                Ok(WireMemberType::Relation) => MemberType::Relation,
                Err(_) => return Err(Error::UnknownMemberType(raw_type)),
            };
            let role_sid = *relation.roles_sid.get(i).ok_or_else(|| Error::consistency("member role", i))?;
            Ok(Member {
                id: id.apply(delta),
                member_type,
                role: ctx.strings.get(role_sid)?,
            })
        })
        .collect()
}

// --------------------------------------------------------------------------
// Dense nodes

/// Decodes row `i` of a dense node group. Rows must be visited in order
/// `0..n` with the same `state`.
pub fn decode_dense_node(
    i: usize,
    dense: &osm_pbf::DenseNodes,
    ctx: &BlockContext<'_>,
    state: &mut DeltaState,
) -> Result<Node> {
    let id = *dense.id.get(i).ok_or_else(|| Error::consistency("id", i))?;
    let lat = *dense.lat.get(i).ok_or_else(|| Error::consistency("lat", i))?;
    let lon = *dense.lon.get(i).ok_or_else(|| Error::consistency("lon", i))?;

    let tags = decode_dense_tags(&dense.keys_vals, &ctx.strings, &mut state.kv_cursor)?;
    let info = decode_dense_info(i, dense.denseinfo.as_ref(), ctx, state)?;

    Ok(Node {
        id: state.id.apply(id),
        latitude: ctx.latitude(state.lat.apply(lat)),
        longitude: ctx.longitude(state.lon.apply(lon)),
        tags,
        info,
    })
}

/// Nodes of one dense group, in row order. Stops after the first error.
pub struct DenseNodes<'a> {
    dense: &'a osm_pbf::DenseNodes,
    ctx: BlockContext<'a>,
    state: DeltaState,
    next: usize,
    failed: bool,
}

impl<'a> DenseNodes<'a> {
    pub fn new(dense: &'a osm_pbf::DenseNodes, ctx: BlockContext<'a>) -> Self {
        Self {
            dense,
            ctx,
            state: DeltaState::default(),
            next: 0,
            failed: false,
        }
    }
}

impl Iterator for DenseNodes<'_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.dense.id.len() {
            return None;
        }
        let node = decode_dense_node(self.next, self.dense, &self.ctx, &mut self.state);
        self.next += 1;
        self.failed = node.is_err();
        Some(node)
    }
}

// --------------------------------------------------------------------------
// Blocks

/// Every entity in `block`, lazily and in wire order.
///
/// Within a group, explicit nodes come first, then dense nodes, ways and relations.
pub fn block_entities(block: &osm_pbf::PrimitiveBlock) -> impl Iterator<Item = Result<Entity>> + '_ {
    let ctx = BlockContext::new(block);
    block.primitivegroup.iter().flat_map(move |group| group_entities(group, ctx))
}

fn group_entities<'a>(
    group: &'a osm_pbf::PrimitiveGroup,
    ctx: BlockContext<'a>,
) -> impl Iterator<Item = Result<Entity>> + 'a {
    let nodes = group.nodes.iter().map(move |node| decode_node(node, &ctx).map(Entity::Node));
    let dense = group
        .dense
        .iter()
        .flat_map(move |dense| DenseNodes::new(dense, ctx))
        .map(|node| node.map(Entity::Node));
    let ways = group.ways.iter().map(move |way| decode_way(way, &ctx).map(Entity::Way));
    let relations = group
        .relations
        .iter()
        .map(move |relation| decode_relation(relation, &ctx).map(Entity::Relation));
    nodes.chain(dense).chain(ways).chain(relations)
}
