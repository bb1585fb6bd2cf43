//! START STOP UNIT (C5, spec §4.5.8)

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::identify::DeviceCtx;
use crate::sense::emit_invalid_field_in_cdb;
use crate::status::map_status_to_sense;
use crate::transport::{admin_opcode, io_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const START_STOP_UNIT: u8 = 0x1B;

mod power_condition {
    pub const START_VALID: u8 = 0x0;
    pub const ACTIVE: u8 = 0x1;
    pub const IDLE: u8 = 0x2;
    pub const STANDBY: u8 = 0x3;
}

/// Map (power condition, modifier, START) onto an NVMe power state index,
/// per spec.md §4.5.8.
fn power_state_for(ctx: &DeviceCtx, pc: u8, modifier: u8, start: bool) -> Option<u8> {
    match pc {
        power_condition::START_VALID => Some(if start { 0 } else { ctx.controller.npss }),
        power_condition::ACTIVE => Some(0),
        power_condition::IDLE => Some(modifier.wrapping_add(1)),
        power_condition::STANDBY => match modifier {
            0 => Some(ctx.controller.npss.saturating_sub(2)),
            1 => Some(ctx.controller.npss.saturating_sub(1)),
            _ => None,
        },
        _ => None,
    }
}

pub fn start_stop_unit<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let b4 = view.byte(4);
    let noflush = b4 & 0x04 != 0;
    let start = b4 & 0x01 != 0;
    let pc = (view.byte(4) >> 4) & 0x0F;
    let modifier = view.byte(3) & 0x0F;

    let Some(state) = power_state_for(ctx, pc, modifier, start) else {
        emit_invalid_field_in_cdb(sense, descriptor_format, 4, 7);
        return ScsiResult::check_condition();
    };

    if !noflush {
        let flush = transport.issue_io(io_opcode::FLUSH, ctx.nsid, [0; 6], BufDir::None, timeout);
        if !flush.is_success() {
            map_status_to_sense(flush, sense, descriptor_format);
            return ScsiResult::check_condition();
        }
    }

    let completion = transport.issue_admin(
        admin_opcode::SET_FEATURES,
        0,
        [0x02, state as u32, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}
