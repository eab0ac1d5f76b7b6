//! Codec for the item stat blob stored in `item_inventory.data`: a fixed
//! header, then a little-endian `template_id`, an `int_count` and that
//! many `(prop_id, u32)` pairs, then a `float_count` and that many
//! `(prop_id, f32)` pairs.

use ops_api::{Error, Result};
use ops_core::{ItemDna, OrderedFloat};

/// Size of the engine magic/flags header preceding `template_id`. The
/// bytes themselves are opaque to this codec; only their length matters.
const BLOB_HEADER_LEN: usize = 16;

pub fn decode_template_id(blob: &[u8]) -> Result<i64> {
    read_i32(blob, BLOB_HEADER_LEN).map(i64::from)
}

/// Parse the int/float stat maps out of a raw blob, dropping any
/// per-instance identifier (`PROP_ID_INSTANCE_GUID`) so DNA cloned into a
/// listing never carries the seller's item identity across.
pub fn decode_dna(blob: &[u8]) -> Result<ItemDna> {
    let mut offset = BLOB_HEADER_LEN + 4; // skip header + template_id
    let int_count = read_u32(blob, offset)? as usize;
    offset += 4;

    let mut int_stats = std::collections::HashMap::with_capacity(int_count);
    for _ in 0..int_count {
        let prop_id = read_u32(blob, offset)?;
        offset += 4;
        let value = read_u32(blob, offset)?;
        offset += 4;
        if prop_id != ops_core::PROP_ID_INSTANCE_GUID {
            int_stats.insert(prop_id, value);
        }
    }

    let float_count = read_u32(blob, offset)? as usize;
    offset += 4;

    let mut float_stats = std::collections::HashMap::with_capacity(float_count);
    for _ in 0..float_count {
        let prop_id = read_u32(blob, offset)?;
        offset += 4;
        let value = read_f32(blob, offset)?;
        offset += 4;
        float_stats.insert(prop_id, OrderedFloat(value));
    }

    Ok(ItemDna { int_stats, float_stats })
}

/// Read a single int-stat value (e.g. the stack quantity or the sell
/// mark), returning `None` if the property isn't present.
pub fn int_stat(blob: &[u8], prop_id: u32) -> Result<Option<u32>> {
    Ok(decode_dna(blob)?.int_stats.get(&prop_id).copied())
}

pub fn encode(template_id: i64, dna: &ItemDna) -> Vec<u8> {
    let mut out = vec![0u8; BLOB_HEADER_LEN];
    out.extend_from_slice(&(template_id as i32).to_le_bytes());
    out.extend_from_slice(&(dna.int_stats.len() as u32).to_le_bytes());
    for (prop_id, value) in &dna.int_stats {
        out.extend_from_slice(&prop_id.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&(dna.float_stats.len() as u32).to_le_bytes());
    for (prop_id, value) in &dna.float_stats {
        out.extend_from_slice(&prop_id.to_le_bytes());
        out.extend_from_slice(&value.0.to_le_bytes());
    }
    out
}

fn read_i32(blob: &[u8], offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = blob
        .get(offset..offset + 4)
        .ok_or_else(|| Error::MalformedBlob(format!("blob too short at offset {offset}")))?
        .try_into()
        .unwrap();
    Ok(i32::from_le_bytes(bytes))
}

fn read_u32(blob: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = blob
        .get(offset..offset + 4)
        .ok_or_else(|| Error::MalformedBlob(format!("blob too short at offset {offset}")))?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32(blob: &[u8], offset: usize) -> Result<f32> {
    let bytes: [u8; 4] = blob
        .get(offset..offset + 4)
        .ok_or_else(|| Error::MalformedBlob(format!("blob too short at offset {offset}")))?
        .try_into()
        .unwrap();
    Ok(f32::from_le_bytes(bytes))
}
