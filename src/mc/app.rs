//! Application netfn commands.

use crate::proto::{CmdResult, CompletionCode};

use super::Mc;

pub const GET_DEVICE_ID: u8 = 0x01;
pub const SEND_MSG: u8 = 0x34;

pub(crate) fn handle(mc: &mut Mc, cmd: u8, _data: &[u8]) -> CmdResult {
    match cmd {
        GET_DEVICE_ID => get_device_id(mc),
        _ => Err(CompletionCode::InvalidCommand),
    }
}

/// Get Device ID is mandatory for every controller, whatever its
/// advertised capabilities.
fn get_device_id(mc: &Mc) -> CmdResult {
    let mut rsp = Vec::with_capacity(11);

    rsp.push(mc.device_id);
    rsp.push((u8::from(mc.has_device_sdrs) << 7) | (mc.device_revision & 0x0F));
    rsp.push(mc.major_fw_revision & 0x7F);
    rsp.push(mc.minor_fw_revision);
    rsp.push(0x51); // IPMI version 1.5, BCD encoded
    rsp.push(mc.device_support.bits());
    rsp.extend_from_slice(&mc.manufacturer_id);
    rsp.extend_from_slice(&mc.product_id);

    Ok(rsp)
}
