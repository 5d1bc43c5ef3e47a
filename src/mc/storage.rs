//! Storage netfn commands: FRU inventory, SDR repository and SEL.

use crate::codec::get_u16_le;
use crate::proto::{CmdResult, CompletionCode};
use crate::storage::PartialSdr;

use super::{DeviceSupport, Mc};

pub const GET_FRU_INVENTORY_AREA_INFO: u8 = 0x10;
pub const READ_FRU_DATA: u8 = 0x11;
pub const WRITE_FRU_DATA: u8 = 0x12;

pub const GET_SDR_REPOSITORY_INFO: u8 = 0x20;
pub const GET_SDR_REPOSITORY_ALLOC_INFO: u8 = 0x21;
pub const RESERVE_SDR_REPOSITORY: u8 = 0x22;
pub const GET_SDR: u8 = 0x23;
pub const ADD_SDR: u8 = 0x24;
pub const PARTIAL_ADD_SDR: u8 = 0x25;
pub const DELETE_SDR: u8 = 0x26;
pub const CLEAR_SDR_REPOSITORY: u8 = 0x27;
pub const GET_SDR_REPOSITORY_TIME: u8 = 0x28;
pub const SET_SDR_REPOSITORY_TIME: u8 = 0x29;
pub const ENTER_SDR_REPOSITORY_UPDATE_MODE: u8 = 0x2A;
pub const EXIT_SDR_REPOSITORY_UPDATE_MODE: u8 = 0x2B;

pub const GET_SEL_INFO: u8 = 0x40;
pub const GET_SEL_ALLOC_INFO: u8 = 0x41;
pub const RESERVE_SEL: u8 = 0x42;
pub const GET_SEL_ENTRY: u8 = 0x43;
pub const ADD_SEL_ENTRY: u8 = 0x44;
pub const DELETE_SEL_ENTRY: u8 = 0x46;
pub const CLEAR_SEL: u8 = 0x47;
pub const GET_SEL_TIME: u8 = 0x48;
pub const SET_SEL_TIME: u8 = 0x49;

pub(crate) fn handle(mc: &mut Mc, cmd: u8, data: &[u8]) -> CmdResult {
    match cmd {
        GET_FRU_INVENTORY_AREA_INFO => {
            require(mc, DeviceSupport::FRU_INVENTORY)?;
            mc.frus.get_area_info(data)
        }
        READ_FRU_DATA => {
            require(mc, DeviceSupport::FRU_INVENTORY)?;
            mc.frus.read(data)
        }
        WRITE_FRU_DATA => {
            require(mc, DeviceSupport::FRU_INVENTORY)?;
            mc.frus.write(data)
        }

        GET_SDR_REPOSITORY_INFO => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.get_info()
        }
        GET_SDR_REPOSITORY_ALLOC_INFO => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.get_alloc_info()
        }
        RESERVE_SDR_REPOSITORY => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            // A new reservation invalidates any partial add in flight.
            mc.part_add = None;
            mc.main_sdrs.reserve()
        }
        GET_SDR => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.get(data)
        }
        ADD_SDR => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.add(data, mc.in_update_mode)
        }
        PARTIAL_ADD_SDR => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            partial_add_sdr(mc, data).map_err(|code| {
                // Every partial-add failure discards the working record.
                mc.part_add = None;
                code
            })
        }
        DELETE_SDR => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.delete(data)
        }
        CLEAR_SDR_REPOSITORY => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.clear(data)
        }
        GET_SDR_REPOSITORY_TIME => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.get_time()
        }
        SET_SDR_REPOSITORY_TIME => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            mc.main_sdrs.set_time(data)
        }
        ENTER_SDR_REPOSITORY_UPDATE_MODE => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            require_modal(mc)?;
            mc.in_update_mode = true;
            Ok(Vec::new())
        }
        EXIT_SDR_REPOSITORY_UPDATE_MODE => {
            require(mc, DeviceSupport::SDR_REPOSITORY)?;
            require_modal(mc)?;
            mc.in_update_mode = false;
            mc.part_add = None;
            Ok(Vec::new())
        }

        GET_SEL_INFO => mc.sel.get_info(),
        GET_SEL_ALLOC_INFO => mc.sel.get_alloc_info(),
        RESERVE_SEL => mc.sel.reserve(),
        GET_SEL_ENTRY => mc.sel.get_entry(data),
        ADD_SEL_ENTRY => {
            require(mc, DeviceSupport::SEL_DEVICE)?;
            mc.sel.add_entry(data)
        }
        DELETE_SEL_ENTRY => mc.sel.delete_entry(data),
        CLEAR_SEL => mc.sel.clear(data),
        GET_SEL_TIME => mc.sel.get_time(),
        SET_SEL_TIME => mc.sel.set_time(data),

        _ => Err(CompletionCode::InvalidCommand),
    }
}

fn require(mc: &Mc, support: DeviceSupport) -> Result<(), CompletionCode> {
    if mc.device_support.contains(support) {
        Ok(())
    } else {
        Err(CompletionCode::InvalidCommand)
    }
}

fn require_modal(mc: &Mc) -> Result<(), CompletionCode> {
    if mc.main_sdrs.update_mode().modal_capable() {
        Ok(())
    } else {
        Err(CompletionCode::InvalidCommand)
    }
}

/// Partial Add SDR. The first segment (record id 0) opens a working
/// record and is answered with the id the committed record will carry;
/// continuations must land exactly on the received-bytes watermark.
fn partial_add_sdr(mc: &mut Mc, data: &[u8]) -> CmdResult {
    if !mc.main_sdrs.supports_partial_add() {
        return Err(CompletionCode::InvalidCommand);
    }

    if !mc.main_sdrs.update_mode().non_modal_capable() && !mc.in_update_mode {
        return Err(CompletionCode::NotSupportedInPresentState);
    }

    if data.len() < 7 {
        return Err(CompletionCode::RequestDataLengthInvalid);
    }

    mc.main_sdrs
        .check_partial_add_reservation(get_u16_le(data, 0))?;

    let record_id = get_u16_le(data, 2);
    let offset = data[4] as usize;
    let progress = data[5];
    let segment = &data[6..];

    let id = if record_id == 0 {
        if mc.part_add.is_some() || offset != 0 {
            return Err(CompletionCode::InvalidDataField);
        }

        let id = mc.main_sdrs.allocate_id()?;
        mc.part_add = Some(PartialSdr::begin(id, segment)?);

        id
    } else {
        let working = mc
            .part_add
            .as_mut()
            .ok_or(CompletionCode::NotPresent)?;

        if working.record_id() != record_id {
            return Err(CompletionCode::NotPresent);
        }

        working.extend(offset, segment)?;

        record_id
    };

    if progress & 0x0F == 1 {
        match mc.part_add.take() {
            Some(working) => mc.main_sdrs.commit(working.finish()?)?,
            None => return Err(CompletionCode::NotPresent),
        }
    }

    Ok(id.to_le_bytes().to_vec())
}
