//! Sensor/event netfn commands: event receiver configuration, device
//! SDR access and the per-sensor command set.

use crate::proto::{CmdResult, CompletionCode, LogicalUnit};
use crate::sensor::Sensor;

use super::{DeviceSupport, Event, Mc};

pub const SET_EVENT_RECEIVER: u8 = 0x00;
pub const GET_EVENT_RECEIVER: u8 = 0x01;

pub const GET_DEVICE_SDR_INFO: u8 = 0x20;
pub const GET_DEVICE_SDR: u8 = 0x21;
pub const RESERVE_DEVICE_SDR_REPOSITORY: u8 = 0x22;

pub const SET_SENSOR_HYSTERESIS: u8 = 0x24;
pub const GET_SENSOR_HYSTERESIS: u8 = 0x25;
pub const SET_SENSOR_THRESHOLD: u8 = 0x26;
pub const GET_SENSOR_THRESHOLD: u8 = 0x27;
pub const SET_SENSOR_EVENT_ENABLE: u8 = 0x28;
pub const GET_SENSOR_EVENT_ENABLE: u8 = 0x29;
pub const GET_SENSOR_READING: u8 = 0x2D;
pub const GET_SENSOR_TYPE: u8 = 0x2F;

pub(crate) fn handle(
    mc: &mut Mc,
    lun: LogicalUnit,
    cmd: u8,
    data: &[u8],
    events: &mut Vec<Event>,
) -> CmdResult {
    match cmd {
        SET_EVENT_RECEIVER => set_event_receiver(mc, data),
        GET_EVENT_RECEIVER => get_event_receiver(mc),

        GET_DEVICE_SDR_INFO => get_device_sdr_info(mc, lun, data),
        GET_DEVICE_SDR => {
            require_device_sdrs(mc)?;
            mc.device_sdrs[lun.value() as usize].get(data)
        }
        RESERVE_DEVICE_SDR_REPOSITORY => {
            require_device_sdrs(mc)?;
            mc.device_sdrs[lun.value() as usize].reserve()
        }

        SET_SENSOR_HYSTERESIS => {
            min_len(data, 4)?;
            sensor_mut(mc, lun, data[0])?.set_hysteresis_cmd(data)
        }
        GET_SENSOR_HYSTERESIS => {
            min_len(data, 1)?;
            sensor(mc, lun, data[0])?.get_hysteresis_cmd()
        }
        SET_SENSOR_THRESHOLD => {
            min_len(data, 8)?;
            let num = data[0];
            let mut requests = Vec::new();
            let rsp = sensor_mut(mc, lun, num)?.set_thresholds_cmd(data, &mut requests)?;
            mc.queue_sensor_events(lun, num, &requests, true, events);
            Ok(rsp)
        }
        GET_SENSOR_THRESHOLD => {
            min_len(data, 1)?;
            sensor(mc, lun, data[0])?.get_thresholds_cmd()
        }
        SET_SENSOR_EVENT_ENABLE => {
            min_len(data, 2)?;
            sensor_mut(mc, lun, data[0])?.set_event_enable_cmd(data)
        }
        GET_SENSOR_EVENT_ENABLE => {
            min_len(data, 1)?;
            sensor(mc, lun, data[0])?.get_event_enable_cmd()
        }
        GET_SENSOR_READING => {
            min_len(data, 1)?;
            sensor(mc, lun, data[0])?.get_reading_cmd()
        }
        GET_SENSOR_TYPE => {
            min_len(data, 1)?;
            sensor(mc, lun, data[0])?.get_type_cmd()
        }

        _ => Err(CompletionCode::InvalidCommand),
    }
}

fn min_len(data: &[u8], len: usize) -> Result<(), CompletionCode> {
    if data.len() < len {
        Err(CompletionCode::RequestDataLengthInvalid)
    } else {
        Ok(())
    }
}

fn sensor<'mc>(mc: &'mc Mc, lun: LogicalUnit, num: u8) -> Result<&'mc Sensor, CompletionCode> {
    mc.sensor(lun, num).ok_or(CompletionCode::NotPresent)
}

fn sensor_mut<'mc>(
    mc: &'mc mut Mc,
    lun: LogicalUnit,
    num: u8,
) -> Result<&'mc mut Sensor, CompletionCode> {
    mc.sensor_mut(lun, num).ok_or(CompletionCode::NotPresent)
}

/// Event receiver configuration is a capability of event generators.
fn require_event_generator(mc: &Mc) -> Result<(), CompletionCode> {
    if mc.device_support.contains(DeviceSupport::IPMB_EVENT_GENERATOR) {
        Ok(())
    } else {
        Err(CompletionCode::InvalidCommand)
    }
}

fn require_device_sdrs(mc: &Mc) -> Result<(), CompletionCode> {
    if mc.has_device_sdrs {
        Ok(())
    } else {
        Err(CompletionCode::InvalidCommand)
    }
}

fn set_event_receiver(mc: &mut Mc, data: &[u8]) -> CmdResult {
    require_event_generator(mc)?;
    min_len(data, 2)?;

    mc.set_event_receiver(data[0], data[1]);

    Ok(Vec::new())
}

fn get_event_receiver(mc: &Mc) -> CmdResult {
    require_event_generator(mc)?;

    Ok(vec![mc.event_receiver, mc.event_receiver_lun])
}

fn get_device_sdr_info(mc: &Mc, lun: LogicalUnit, data: &[u8]) -> CmdResult {
    require_device_sdrs(mc)?;

    // Operation bit 0 selects the SDR count over the sensor count.
    let want_sdr_count = data.first().map(|op| op & 0x01 != 0).unwrap_or(false);

    let count = if want_sdr_count {
        mc.device_sdrs[lun.value() as usize].record_count()
    } else {
        mc.sensors[lun.value() as usize].len()
    }
    .min(255) as u8;

    let mut flags = u8::from(mc.dynamic_sensor_population) << 7;
    for (i, table) in mc.sensors.iter().enumerate() {
        if !table.is_empty() {
            flags |= 1 << i;
        }
    }

    let mut rsp = vec![count, flags];
    if mc.dynamic_sensor_population {
        rsp.extend_from_slice(&mc.sensor_population_change.to_le_bytes());
    }

    Ok(rsp)
}
