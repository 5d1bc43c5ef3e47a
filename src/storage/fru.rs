use std::collections::BTreeMap;

use nonmax::NonMaxU8;

use crate::codec::{get_u16_le, set_u16_le};
use crate::proto::{CmdResult, CompletionCode, MAX_MSG_RETURN_DATA};
use crate::ConfigError;

/// The FRU inventory areas of one MC, keyed by device id (0..254).
///
/// Areas are fixed-size byte buffers; reads and writes address them by
/// 16-bit offset and never grow them.
#[derive(Debug, Default)]
pub struct FruInventory {
    devices: BTreeMap<u8, Vec<u8>>,
}

impl FruInventory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the data buffer behind a device id.
    pub fn add_device(&mut self, device_id: NonMaxU8, data: Vec<u8>) -> Result<(), ConfigError> {
        if data.len() > u16::MAX as usize {
            return Err(ConfigError::FruTooLarge(data.len()));
        }

        self.devices.insert(device_id.get(), data);

        Ok(())
    }

    pub fn device(&self, device_id: u8) -> Option<&[u8]> {
        self.devices.get(&device_id).map(Vec::as_slice)
    }

    fn device_checked(&self, device_id: u8) -> Result<&Vec<u8>, CompletionCode> {
        self.devices
            .get(&device_id)
            .ok_or(CompletionCode::InvalidDataField)
    }

    pub(crate) fn get_area_info(&self, data: &[u8]) -> CmdResult {
        if data.is_empty() {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        let area = self.device_checked(data[0])?;

        let mut rsp = vec![0u8; 3];
        set_u16_le(&mut rsp, 0, area.len() as u16);
        // Byte 2: the device is accessed by bytes, not words.

        Ok(rsp)
    }

    pub(crate) fn read(&self, data: &[u8]) -> CmdResult {
        if data.len() < 4 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        let area = self.device_checked(data[0])?;
        let offset = get_u16_le(data, 1) as usize;
        let count = data[3] as usize;

        if offset >= area.len() {
            return Err(CompletionCode::ParameterOutOfRange);
        }

        if count > MAX_MSG_RETURN_DATA - 2 {
            return Err(CompletionCode::CannotReturnRequestedBytes);
        }

        let count = count.min(area.len() - offset);

        let mut rsp = Vec::with_capacity(1 + count);
        rsp.push(count as u8);
        rsp.extend_from_slice(&area[offset..offset + count]);

        Ok(rsp)
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> CmdResult {
        if data.len() < 3 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        let offset = get_u16_le(data, 1) as usize;
        let bytes = &data[3..];

        let area = self
            .devices
            .get_mut(&data[0])
            .ok_or(CompletionCode::InvalidDataField)?;

        if offset >= area.len() {
            return Err(CompletionCode::ParameterOutOfRange);
        }

        // Writes never truncate; running past the end is refused whole.
        if offset + bytes.len() > area.len() {
            return Err(CompletionCode::ParameterOutOfRange);
        }

        area[offset..offset + bytes.len()].copy_from_slice(bytes);

        Ok(vec![bytes.len() as u8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> FruInventory {
        let mut fru = FruInventory::new();
        fru.add_device(NonMaxU8::new(0).unwrap(), vec![0u8; 64])
            .unwrap();
        fru
    }

    #[test]
    fn unknown_device_is_a_data_field_error() {
        let fru = inventory();

        assert_eq!(
            Err(CompletionCode::InvalidDataField),
            fru.get_area_info(&[5])
        );
        assert_eq!(
            Err(CompletionCode::InvalidDataField),
            fru.read(&[5, 0, 0, 4])
        );
    }

    #[test]
    fn area_info_reports_length() {
        let fru = inventory();

        assert_eq!(Ok(vec![64, 0, 0]), fru.get_area_info(&[0]));
    }

    #[test]
    fn read_clamps_to_area_end() {
        let mut fru = inventory();
        fru.write(&[0, 60, 0, 1, 2, 3, 4]).unwrap();

        let rsp = fru.read(&[0, 60, 0, 0xFF]).unwrap();
        assert_eq!(vec![4, 1, 2, 3, 4], rsp);

        assert_eq!(
            Err(CompletionCode::ParameterOutOfRange),
            fru.read(&[0, 64, 0, 1])
        );
    }

    #[test]
    fn write_refuses_overflow() {
        let mut fru = inventory();

        assert_eq!(
            Err(CompletionCode::ParameterOutOfRange),
            fru.write(&[0, 62, 0, 1, 2, 3, 4])
        );

        // The refused write changed nothing.
        let rsp = fru.read(&[0, 62, 0, 2]).unwrap();
        assert_eq!(vec![2, 0, 0], rsp);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut fru = inventory();

        fru.write(&[0, 10, 0, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let rsp = fru.read(&[0, 10, 0, 4]).unwrap();
        assert_eq!(vec![4, 0xDE, 0xAD, 0xBE, 0xEF], rsp);
    }
}
