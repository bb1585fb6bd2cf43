//! READ CAPACITY (10h = 25h, 16h = service action 10h under opcode 9Eh)
//!
//! C5, spec §4.5 (component table) and §8 scenario S2. Pure identify-cache
//! lookups — no NVMe command to issue, matching how `inquiry.rs` serves
//! VPD pages straight out of `DeviceCtx`.

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::put_be_u32;
use crate::identify::DeviceCtx;
use crate::sense::emit_invalid_field_in_cdb;
use crate::validate::validate_control_byte;

pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_CAPACITY_16_SERVICE_ACTION: u8 = 0x10;
pub const SERVICE_ACTION_IN_16: u8 = 0x9E;

pub fn read_capacity_10(
    ctx: &DeviceCtx,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    for b in data.iter_mut() {
        *b = 0;
    }
    let max_lba = ctx.max_lba().min(u32::MAX as u64) as u32;
    if data.len() >= 4 {
        put_be_u32(&mut data[0..4], max_lba);
    }
    if data.len() >= 8 {
        put_be_u32(&mut data[4..8], ctx.block_size());
    }
    ScsiResult::good_with_len(data.len().min(8))
}

pub fn read_capacity_16(
    ctx: &DeviceCtx,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    for b in data.iter_mut() {
        *b = 0;
    }
    let max_lba = ctx.max_lba();
    if data.len() >= 8 {
        data[0..8].copy_from_slice(&max_lba.to_be_bytes());
    }
    if data.len() >= 12 {
        put_be_u32(&mut data[8..12], ctx.block_size());
    }
    if data.len() >= 13 {
        data[12] = ctx.namespace.protection_type().saturating_sub(1).min(0x07) << 1;
        if ctx.namespace.protection_type() != 0 {
            data[12] |= 0x01; // PROT_EN
        } else {
            data[12] = 0;
        }
    }
    ScsiResult::good_with_len(data.len().min(32))
}
