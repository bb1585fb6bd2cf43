//! UNMAP (C5, spec §4.5.6)
//!
//! Parameter-list block descriptors are coalesced into NVMe Dataset
//! Management range entries and issued in batches of up to 256 — the
//! largest NR the DSM command's CDW10 can express in one call.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{be_u32, be_u64, be_u16, put_le_u32, put_le_u64};
use crate::identify::DeviceCtx;
use crate::sense::{emit_sense, sense_key, SenseDescriptor};
use crate::status::map_status_to_sense;
use crate::transport::{io_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const UNMAP: u8 = 0x42;

const MAX_RANGES_PER_COMMAND: usize = 256;
const RANGE_ENTRY_LEN: usize = 16;
// UNMAP data length (2B) + UNMAP block descriptor data length (2B) + 4
// reserved bytes, ahead of the block descriptors.
const HEADER_LEN: usize = 8;

fn emit_lba_out_of_range(sense: &mut [u8], descriptor_format: bool, field_pointer: u16) {
    emit_sense(
        sense,
        sense_key::ILLEGAL_REQUEST,
        0x21,
        0x00,
        descriptor_format,
        &[SenseDescriptor::FieldPointer {
            cdb_or_data: false,
            bit_pointer_valid: false,
            bit_pointer: 0,
            field_pointer,
        }],
    );
}

pub fn unmap<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        crate::sense::emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    if data.len() < HEADER_LEN {
        return ScsiResult::good();
    }
    let desc_list_len = be_u16(&data[2..4]) as usize;
    let descriptor_count = desc_list_len / RANGE_ENTRY_LEN;
    if descriptor_count == 0 {
        return ScsiResult::good();
    }

    let mut total_blocks: u64 = 0;
    let mut batch = [0u8; MAX_RANGES_PER_COMMAND * RANGE_ENTRY_LEN];
    let mut batch_count = 0usize;

    for i in 0..descriptor_count {
        let off = HEADER_LEN + i * RANGE_ENTRY_LEN;
        if off + RANGE_ENTRY_LEN > data.len() {
            break;
        }
        let lba = be_u64(&data[off..off + 8]);
        let count = be_u32(&data[off + 8..off + 12]);

        if lba > ctx.max_lba() {
            emit_lba_out_of_range(sense, descriptor_format, off as u16);
            return ScsiResult::check_condition();
        }
        if count > 0 && lba + (count as u64 - 1) > ctx.max_lba() {
            emit_lba_out_of_range(sense, descriptor_format, (off + 8) as u16);
            return ScsiResult::check_condition();
        }

        total_blocks = total_blocks.saturating_add(count as u64);
        if total_blocks > 255u64 * u32::MAX as u64 {
            emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x26, 0x00, descriptor_format, &[]);
            return ScsiResult::check_condition();
        }

        let entry_off = batch_count * RANGE_ENTRY_LEN;
        put_le_u32(&mut batch[entry_off..entry_off + 4], 0);
        put_le_u32(&mut batch[entry_off + 4..entry_off + 8], count);
        put_le_u64(&mut batch[entry_off + 8..entry_off + 16], lba);
        batch_count += 1;

        if batch_count == MAX_RANGES_PER_COMMAND {
            if let Some(result) = issue_dsm(ctx, transport, &batch, batch_count, sense, descriptor_format, timeout) {
                return result;
            }
            batch_count = 0;
        }
    }

    if batch_count > 0 {
        if let Some(result) = issue_dsm(ctx, transport, &batch, batch_count, sense, descriptor_format, timeout) {
            return result;
        }
    }

    ScsiResult::good()
}

fn issue_dsm<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    batch: &[u8],
    count: usize,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> Option<ScsiResult> {
    let cdw10 = (count as u32 - 1) & 0xFF;
    let cdw11 = 0x04; // AD (Attribute Deallocate)
    let completion = transport.issue_io(
        io_opcode::DATASET_MANAGEMENT,
        ctx.nsid,
        [cdw10, cdw11, 0, 0, 0, 0],
        BufDir::Out(&batch[..count * RANGE_ENTRY_LEN]),
        timeout,
    );
    if completion.is_success() {
        None
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        Some(ScsiResult::check_condition())
    }
}
