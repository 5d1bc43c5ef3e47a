//! OEM netfn 0x30: chassis-style power control.

use crate::proto::{CmdResult, CompletionCode};

use super::{Event, Mc};

pub const SET_POWER: u8 = 0x01;
pub const GET_POWER: u8 = 0x02;

pub(crate) fn handle(mc: &mut Mc, cmd: u8, data: &[u8], events: &mut Vec<Event>) -> CmdResult {
    match cmd {
        SET_POWER => {
            if data.is_empty() {
                return Err(CompletionCode::RequestDataLengthInvalid);
            }

            mc.set_power(data[0], true, events);

            Ok(Vec::new())
        }
        GET_POWER => Ok(vec![mc.power]),
        _ => Err(CompletionCode::InvalidCommand),
    }
}
