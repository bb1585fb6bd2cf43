//! Dispatcher (C7, spec §4.7)
//!
//! The single public entry point. Validates the control byte, populates
//! the identify cache on first use, and dispatches on opcode — for 9Eh,
//! 9Fh, A3h further dispatching on the 5-bit service action in CDB byte 1.

use crate::capacity::{self, READ_CAPACITY_16_SERVICE_ACTION, SERVICE_ACTION_IN_16};
use crate::cdb::{CdbView, ScsiIo, ScsiResult};
use crate::identify::DeviceCtx;
use crate::inquiry;
use crate::log_sense;
use crate::misc_commands;
use crate::mode;
use crate::persistent_reserve;
use crate::read_write;
use crate::report_opcodes::{self, MAINTENANCE_IN, REPORT_SUPPORTED_OPERATION_CODES};
use crate::request_sense;
use crate::sanitize;
use crate::sense::{emit_invalid_field_in_cdb, emit_invalid_opcode};
use crate::start_stop;
use crate::transport::NvmeTransport;
use crate::unmap;
use crate::validate::validate_control_byte;
use crate::write_buffer;

/// Dispatch a single SCSI command against `ctx` over `transport`.
///
/// On entry: zero the sense buffer, validate the control byte, populate
/// the identify cache if empty, then dispatch on opcode (spec.md §4.7).
/// A caller that passes a zero-length `io.sense` gets its sense data
/// captured into `ctx.fallback_sense` instead of silently dropped.
pub fn translate<T: NvmeTransport>(ctx: &mut DeviceCtx, transport: &mut T, io: &mut ScsiIo<'_>) -> ScsiResult {
    let host_sense_empty = io.sense.is_empty();
    let mut fallback = ctx.fallback_sense;
    let sense: &mut [u8] = if host_sense_empty { &mut fallback } else { io.sense };

    for b in sense.iter_mut() {
        *b = 0;
    }

    let view = CdbView::new(io.cdb);
    if view.is_empty() {
        emit_invalid_opcode(sense, ctx.descriptor_sense);
        if host_sense_empty {
            ctx.fallback_sense = fallback;
        }
        return ScsiResult::check_condition();
    }
    if let Some(need) = crate::cdb::expected_cdb_len(view.opcode()) {
        if let Err(e) = crate::error::check_cdb_len(view, need) {
            log::error!("{e}");
            emit_invalid_field_in_cdb(sense, ctx.descriptor_sense, view.len() as u16, 0);
            if host_sense_empty {
                ctx.fallback_sense = fallback;
            }
            return ScsiResult::check_condition();
        }
    }
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, ctx.descriptor_sense, v.field_pointer, v.bit_pointer);
        if host_sense_empty {
            ctx.fallback_sense = fallback;
        }
        return ScsiResult::check_condition();
    }

    ctx.populate_identify(transport, io.timeout);

    let descriptor_format = ctx.descriptor_sense;
    let opcode = view.opcode();

    let result = match opcode {
        misc_commands::TEST_UNIT_READY => misc_commands::test_unit_ready(view, sense, descriptor_format),
        request_sense::REQUEST_SENSE => {
            request_sense::request_sense(ctx, transport, view, sense, descriptor_format, io.timeout)
        }
        read_write::opcode::READ_6 => read_write::read_6(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::WRITE_6 => read_write::write_6(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        inquiry::INQUIRY => inquiry::inquiry(ctx, view, io.data, sense, descriptor_format),
        mode::opcode::MODE_SELECT_6 => {
            mode::mode_select_6(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        mode::opcode::MODE_SENSE_6 => mode::mode_sense_6(ctx, view, io.data, sense, descriptor_format),
        start_stop::START_STOP_UNIT => {
            start_stop::start_stop_unit(ctx, transport, view, sense, descriptor_format, io.timeout)
        }
        misc_commands::SEND_DIAGNOSTIC => {
            misc_commands::send_diagnostic(ctx, transport, view, sense, descriptor_format, io.timeout)
        }
        capacity::READ_CAPACITY_10 => capacity::read_capacity_10(ctx, view, io.data, sense, descriptor_format),
        read_write::opcode::READ_10 => read_write::read_10(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::WRITE_10 => read_write::write_10(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::VERIFY_10 => read_write::verify_10(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        write_buffer::WRITE_BUFFER => {
            write_buffer::write_buffer(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        misc_commands::WRITE_LONG_10 => {
            misc_commands::write_long_10(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        unmap::UNMAP => unmap::unmap(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        misc_commands::SYNCHRONIZE_CACHE_10 => {
            misc_commands::synchronize_cache(ctx, transport, view, sense, descriptor_format, io.timeout)
        }
        log_sense::LOG_SENSE => log_sense::log_sense(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        mode::opcode::MODE_SELECT_10 => {
            mode::mode_select_10(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        mode::opcode::MODE_SENSE_10 => mode::mode_sense_10(ctx, view, io.data, sense, descriptor_format),
        persistent_reserve::PERSISTENT_RESERVE_IN => {
            persistent_reserve::persistent_reserve_in(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        persistent_reserve::PERSISTENT_RESERVE_OUT => {
            persistent_reserve::persistent_reserve_out(ctx, transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        read_write::opcode::READ_12 => read_write::read_12(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::WRITE_12 => read_write::write_12(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::VERIFY_12 => read_write::verify_12(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        sanitize::SANITIZE => sanitize::sanitize(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::READ_16 => read_write::read_16(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::WRITE_16 => read_write::write_16(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        read_write::opcode::VERIFY_16 => read_write::verify_16(ctx, transport, view, io.data, sense, descriptor_format, io.timeout),
        misc_commands::SYNCHRONIZE_CACHE_16 => {
            misc_commands::synchronize_cache(ctx, transport, view, sense, descriptor_format, io.timeout)
        }
        SERVICE_ACTION_IN_16 => dispatch_service_action_16(ctx, view, io.data, sense, descriptor_format),
        misc_commands::REPORT_LUNS => misc_commands::report_luns(view, io.data, sense, descriptor_format),
        misc_commands::SECURITY_PROTOCOL_IN => {
            misc_commands::security_protocol_in(transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        MAINTENANCE_IN => dispatch_maintenance_in(view, io.data, sense, descriptor_format),
        misc_commands::SECURITY_PROTOCOL_OUT => {
            misc_commands::security_protocol_out(transport, view, io.data, sense, descriptor_format, io.timeout)
        }
        _ => {
            emit_invalid_opcode(sense, descriptor_format);
            ScsiResult::check_condition()
        }
    };

    if host_sense_empty {
        ctx.fallback_sense = fallback;
    }
    result
}

/// Opcode 9Eh (SERVICE ACTION IN (16)): only READ CAPACITY(16)'s service
/// action (10h) is recognized.
fn dispatch_service_action_16(ctx: &DeviceCtx, view: CdbView<'_>, data: &mut [u8], sense: &mut [u8], descriptor_format: bool) -> ScsiResult {
    let service_action = view.byte(1) & 0x1F;
    match service_action {
        READ_CAPACITY_16_SERVICE_ACTION => capacity::read_capacity_16(ctx, view, data, sense, descriptor_format),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            ScsiResult::check_condition()
        }
    }
}

/// Opcode A3h (MAINTENANCE IN): only REPORT SUPPORTED OPERATION CODES
/// (0Ch) is recognized.
fn dispatch_maintenance_in(view: CdbView<'_>, data: &mut [u8], sense: &mut [u8], descriptor_format: bool) -> ScsiResult {
    let service_action = view.byte(1) & 0x1F;
    match service_action {
        REPORT_SUPPORTED_OPERATION_CODES => {
            report_opcodes::report_supported_operation_codes(view, data, sense, descriptor_format)
        }
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            ScsiResult::check_condition()
        }
    }
}
