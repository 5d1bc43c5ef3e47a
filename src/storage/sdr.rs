use bitflags::bitflags;

use crate::codec::{get_u16_le, get_u32_le, set_u16_le, set_u32_le};
use crate::proto::{CmdResult, CompletionCode, MAX_MSG_RETURN_DATA};

use super::{allocate_record_id, wall_clock_secs};

/// An SDR is a 6-byte header (record id, version, type, a reserved byte
/// and the body-length byte) followed by up to 255 body bytes.
pub const MAX_SDR_LENGTH: usize = 261;

/// Offset of the body-length byte within a record.
pub(crate) const LENGTH_BYTE_OFFSET: usize = 5;

/// Number of header bytes preceding the record body.
pub(crate) const HEADER_SIZE: usize = 6;

const MAX_RECORDS: u16 = 255;

bitflags! {
    /// Operation-support bits of the repository info response. The modal
    /// mode lives in bits 5..7 and is kept separately as [`UpdateMode`].
    pub struct SdrFlags: u8 {
        const GET_ALLOC_INFO = 0x01;
        const RESERVE = 0x02;
        const PARTIAL_ADD = 0x04;
        const DELETE = 0x08;
        const OVERFLOW = 0x80;
    }
}

/// How the repository may be updated: directly (non-modal), only between
/// enter/exit update mode commands (modal), or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Unspecified,
    NonModal,
    Modal,
    Both,
}

impl UpdateMode {
    pub(crate) fn bits(self) -> u8 {
        let value = match self {
            UpdateMode::Unspecified => 0,
            UpdateMode::NonModal => 1,
            UpdateMode::Modal => 2,
            UpdateMode::Both => 3,
        };

        value << 5
    }

    pub(crate) fn modal_capable(self) -> bool {
        matches!(self, UpdateMode::Modal | UpdateMode::Both)
    }

    pub(crate) fn non_modal_capable(self) -> bool {
        matches!(self, UpdateMode::NonModal | UpdateMode::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdrRecord {
    data: Vec<u8>,
}

impl SdrRecord {
    pub fn record_id(&self) -> u16 {
        get_u16_le(&self.data, 0)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A sensor data record repository: the main repository of an MC, or one
/// of its per-LUN device repositories.
#[derive(Debug)]
pub struct SdrRepository {
    sdrs: Vec<SdrRecord>,
    flags: SdrFlags,
    update_mode: UpdateMode,
    reservation: u16,
    next_entry: u16,
    last_add_time: u32,
    last_erase_time: u32,
    time_offset: i64,
}

impl SdrRepository {
    pub(crate) fn new() -> Self {
        Self {
            sdrs: Vec::new(),
            flags: SdrFlags::GET_ALLOC_INFO
                | SdrFlags::RESERVE
                | SdrFlags::PARTIAL_ADD
                | SdrFlags::DELETE,
            update_mode: UpdateMode::Both,
            reservation: 0,
            next_entry: 1,
            last_add_time: 0,
            last_erase_time: 0,
            time_offset: 0,
        }
    }

    /// Replace the operation-support flags and modal mode.
    pub fn configure(&mut self, flags: SdrFlags, update_mode: UpdateMode) {
        self.flags = flags & !SdrFlags::OVERFLOW;
        self.update_mode = update_mode;
    }

    pub fn record_count(&self) -> usize {
        self.sdrs.len()
    }

    pub fn records(&self) -> &[SdrRecord] {
        &self.sdrs
    }

    pub fn record(&self, record_id: u16) -> Option<&SdrRecord> {
        self.sdrs.iter().find(|r| r.record_id() == record_id)
    }

    pub fn reservation(&self) -> u16 {
        self.reservation
    }

    pub(crate) fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    fn now(&self) -> u32 {
        (wall_clock_secs() + self.time_offset) as u32
    }

    fn check_reservation(&self, supplied: u16) -> Result<(), CompletionCode> {
        if self.flags.contains(SdrFlags::RESERVE) && supplied != 0 && supplied != self.reservation {
            Err(CompletionCode::InvalidReservation)
        } else {
            Ok(())
        }
    }

    fn index_of(&self, record_id: u16) -> Result<usize, CompletionCode> {
        if self.sdrs.is_empty() {
            return Err(CompletionCode::NotPresent);
        }

        match record_id {
            0x0000 => Ok(0),
            0xFFFF => Ok(self.sdrs.len() - 1),
            id => self
                .sdrs
                .iter()
                .position(|r| r.record_id() == id)
                .ok_or(CompletionCode::NotPresent),
        }
    }

    pub(crate) fn get_info(&mut self) -> CmdResult {
        let count = self.sdrs.len() as u16;
        let free = (MAX_SDR_LENGTH as u32 * (MAX_RECORDS - count) as u32).min(0xFFFE) as u16;

        let mut rsp = vec![0u8; 14];
        rsp[0] = 0x51;
        set_u16_le(&mut rsp, 1, count);
        set_u16_le(&mut rsp, 3, free);
        set_u32_le(&mut rsp, 5, self.last_add_time);
        set_u32_le(&mut rsp, 9, self.last_erase_time);
        rsp[13] = self.flags.bits() | self.update_mode.bits();

        self.flags.remove(SdrFlags::OVERFLOW);

        Ok(rsp)
    }

    pub(crate) fn get_alloc_info(&self) -> CmdResult {
        if !self.flags.contains(SdrFlags::GET_ALLOC_INFO) {
            return Err(CompletionCode::InvalidCommand);
        }

        let free = MAX_RECORDS - self.sdrs.len() as u16;

        let mut rsp = vec![0u8; 9];
        set_u16_le(&mut rsp, 0, MAX_RECORDS);
        set_u16_le(&mut rsp, 2, MAX_SDR_LENGTH as u16);
        set_u16_le(&mut rsp, 4, free);
        set_u16_le(&mut rsp, 6, free);
        rsp[8] = 1;

        Ok(rsp)
    }

    pub(crate) fn reserve(&mut self) -> CmdResult {
        if !self.flags.contains(SdrFlags::RESERVE) {
            return Err(CompletionCode::InvalidCommand);
        }

        self.reservation = self.reservation.wrapping_add(1);
        if self.reservation == 0 {
            self.reservation = 1;
        }

        Ok(self.reservation.to_le_bytes().to_vec())
    }

    pub(crate) fn get(&self, data: &[u8]) -> CmdResult {
        if data.len() < 6 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        let index = self.index_of(get_u16_le(data, 2))?;
        let record = &self.sdrs[index];
        let offset = data[4] as usize;
        let count = data[5] as usize;

        if offset >= record.len() {
            return Err(CompletionCode::InvalidDataField);
        }

        if count > MAX_MSG_RETURN_DATA - 3 {
            return Err(CompletionCode::CannotReturnRequestedBytes);
        }

        let count = count.min(record.len() - offset);
        let next = match self.sdrs.get(index + 1) {
            Some(record) => record.record_id(),
            None => 0xFFFF,
        };

        let mut rsp = Vec::with_capacity(2 + count);
        rsp.extend_from_slice(&next.to_le_bytes());
        rsp.extend_from_slice(&record.data()[offset..offset + count]);

        Ok(rsp)
    }

    /// Single-shot Add SDR. `data` is the full record from the request;
    /// modal gating is the caller's job since update mode is MC state.
    pub(crate) fn add(&mut self, data: &[u8], in_update_mode: bool) -> CmdResult {
        if !self.update_mode.non_modal_capable() && !in_update_mode {
            return Err(CompletionCode::NotSupportedInPresentState);
        }

        if data.len() < HEADER_SIZE {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        if data.len() != data[LENGTH_BYTE_OFFSET] as usize + HEADER_SIZE {
            return Err(CompletionCode::RecordLengthInvalid);
        }

        let id = self.allocate_id()?;

        let mut record = data.to_vec();
        set_u16_le(&mut record, 0, id);
        self.commit(SdrRecord { data: record })?;

        Ok(id.to_le_bytes().to_vec())
    }

    /// Reserve a record id for a record that will be committed later.
    pub(crate) fn allocate_id(&mut self) -> Result<u16, CompletionCode> {
        if self.sdrs.len() >= MAX_RECORDS as usize {
            self.flags.insert(SdrFlags::OVERFLOW);
            return Err(CompletionCode::OutOfSpace);
        }

        let sdrs = &self.sdrs;
        allocate_record_id(&mut self.next_entry, |id| {
            sdrs.iter().any(|r| r.record_id() == id)
        })
        .ok_or(CompletionCode::OutOfSpace)
    }

    /// Append a fully formed record (id bytes already set).
    pub(crate) fn commit(&mut self, record: SdrRecord) -> Result<(), CompletionCode> {
        if self.sdrs.len() >= MAX_RECORDS as usize {
            self.flags.insert(SdrFlags::OVERFLOW);
            return Err(CompletionCode::OutOfSpace);
        }

        log::debug!(
            "SDR add: record 0x{:04X}, {} bytes",
            record.record_id(),
            record.len()
        );

        self.last_add_time = self.now();
        self.sdrs.push(record);

        Ok(())
    }

    pub(crate) fn supports_partial_add(&self) -> bool {
        self.flags.contains(SdrFlags::PARTIAL_ADD)
    }

    pub(crate) fn check_partial_add_reservation(&self, supplied: u16) -> Result<(), CompletionCode> {
        self.check_reservation(supplied)
    }

    pub(crate) fn delete(&mut self, data: &[u8]) -> CmdResult {
        if !self.flags.contains(SdrFlags::DELETE) {
            return Err(CompletionCode::InvalidCommand);
        }

        if data.len() < 4 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        let index = self.index_of(get_u16_le(data, 2))?;
        let id = self.sdrs.remove(index).record_id();

        Ok(id.to_le_bytes().to_vec())
    }

    pub(crate) fn clear(&mut self, data: &[u8]) -> CmdResult {
        if data.len() < 6 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        if &data[2..5] != b"CLR" {
            return Err(CompletionCode::InvalidDataField);
        }

        match data[5] {
            0x00 => {
                self.sdrs.clear();
                self.last_erase_time = self.now();
            }
            0xAA => {}
            _ => return Err(CompletionCode::InvalidDataField),
        }

        Ok(vec![0x01])
    }

    pub(crate) fn get_time(&self) -> CmdResult {
        Ok(self.now().to_le_bytes().to_vec())
    }

    pub(crate) fn set_time(&mut self, data: &[u8]) -> CmdResult {
        if data.len() < 4 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.time_offset = get_u32_le(data, 0) as i64 - wall_clock_secs();

        Ok(Vec::new())
    }

    /// Insert raw record data from the configuration API.
    pub(crate) fn insert_raw(&mut self, data: &[u8]) -> Result<u16, crate::ConfigError> {
        if data.len() < HEADER_SIZE
            || data.len() > MAX_SDR_LENGTH
            || data.len() != data[LENGTH_BYTE_OFFSET] as usize + HEADER_SIZE
        {
            return Err(crate::ConfigError::InvalidSdr);
        }

        let id = self
            .allocate_id()
            .map_err(|_| crate::ConfigError::RepositoryFull)?;

        let mut record = data.to_vec();
        set_u16_le(&mut record, 0, id);
        self.commit(SdrRecord { data: record })
            .map_err(|_| crate::ConfigError::RepositoryFull)?;

        Ok(id)
    }
}

/// In-progress partial add: the record bytes received so far plus the
/// total length declared by the first segment's header.
#[derive(Debug)]
pub(crate) struct PartialSdr {
    data: Vec<u8>,
    total: usize,
}

impl PartialSdr {
    /// Begin from the first segment's record bytes. The segment must
    /// contain the whole header and must not exceed the declared total.
    pub(crate) fn begin(record_id: u16, segment: &[u8]) -> Result<Self, CompletionCode> {
        if segment.len() < HEADER_SIZE {
            return Err(CompletionCode::RecordLengthInvalid);
        }

        let total = segment[LENGTH_BYTE_OFFSET] as usize + HEADER_SIZE;

        if segment.len() > total {
            return Err(CompletionCode::RecordLengthInvalid);
        }

        let mut data = segment.to_vec();
        set_u16_le(&mut data, 0, record_id);

        Ok(Self { data, total })
    }

    pub(crate) fn record_id(&self) -> u16 {
        get_u16_le(&self.data, 0)
    }

    /// The offset the next segment must carry.
    pub(crate) fn next_offset(&self) -> usize {
        self.data.len()
    }

    /// Append a continuation segment. Offsets are strict: a gap or an
    /// overshoot past the declared total discards the record.
    pub(crate) fn extend(&mut self, offset: usize, segment: &[u8]) -> Result<(), CompletionCode> {
        if offset != self.data.len() {
            return Err(CompletionCode::ParameterOutOfRange);
        }

        if offset + segment.len() > self.total {
            return Err(CompletionCode::RecordLengthInvalid);
        }

        self.data.extend_from_slice(segment);

        Ok(())
    }

    /// Turn the working record into a committable one; the byte count
    /// must match the total declared up front.
    pub(crate) fn finish(self) -> Result<SdrRecord, CompletionCode> {
        if self.data.len() != self.total {
            return Err(CompletionCode::RecordLengthInvalid);
        }

        Ok(SdrRecord { data: self.data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(body_len: u8) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE + body_len as usize];
        data[2] = 0x51;
        data[3] = 0x01;
        data[LENGTH_BYTE_OFFSET] = body_len;
        for (i, b) in data[HEADER_SIZE..].iter_mut().enumerate() {
            *b = i as u8;
        }
        data
    }

    #[test]
    fn add_validates_length_byte() {
        let mut repo = SdrRepository::new();

        let mut data = record_bytes(8);
        data[LENGTH_BYTE_OFFSET] = 9;

        assert_eq!(
            Err(CompletionCode::RecordLengthInvalid),
            repo.add(&data, false)
        );
        assert_eq!(0, repo.record_count());
    }

    #[test]
    fn add_rewrites_record_id() {
        let mut repo = SdrRepository::new();

        let mut data = record_bytes(8);
        data[0] = 0xAB;
        data[1] = 0xCD;

        let rsp = repo.add(&data, false).unwrap();
        assert_eq!(vec![1, 0], rsp);
        assert_eq!(1, repo.records()[0].record_id());
        assert_eq!(&data[2..], &repo.records()[0].data()[2..]);
    }

    #[test]
    fn modal_only_repository_requires_update_mode() {
        let mut repo = SdrRepository::new();
        repo.configure(
            SdrFlags::RESERVE | SdrFlags::PARTIAL_ADD,
            UpdateMode::Modal,
        );

        assert_eq!(
            Err(CompletionCode::NotSupportedInPresentState),
            repo.add(&record_bytes(4), false)
        );
        assert!(repo.add(&record_bytes(4), true).is_ok());
    }

    #[test]
    fn get_walks_records_in_order() {
        let mut repo = SdrRepository::new();
        repo.add(&record_bytes(4), false).unwrap();
        repo.add(&record_bytes(6), false).unwrap();

        // Record 0 resolves to the head; the response names the next id.
        let rsp = repo.get(&[0, 0, 0, 0, 0, 0xFF]).unwrap();
        assert_eq!([2, 0], rsp[0..2]);
        assert_eq!(HEADER_SIZE + 4, rsp.len() - 2);

        let rsp = repo.get(&[0, 0, 2, 0, 0, 0xFF]).unwrap();
        assert_eq!([0xFF, 0xFF], rsp[0..2]);

        assert_eq!(
            Err(CompletionCode::NotPresent),
            repo.get(&[0, 0, 9, 0, 0, 0xFF])
        );
    }

    #[test]
    fn partial_segments_reassemble() {
        let full = record_bytes(10);

        let mut partial = PartialSdr::begin(7, &full[..HEADER_SIZE + 4]).unwrap();
        assert_eq!(HEADER_SIZE + 4, partial.next_offset());

        partial.extend(HEADER_SIZE + 4, &full[HEADER_SIZE + 4..]).unwrap();

        let record = partial.finish().unwrap();
        assert_eq!(7, record.record_id());
        assert_eq!(&full[2..], &record.data()[2..]);
    }

    #[test]
    fn partial_rejects_offset_gap() {
        let full = record_bytes(10);
        let mut partial = PartialSdr::begin(7, &full[..HEADER_SIZE + 4]).unwrap();

        assert_eq!(
            Err(CompletionCode::ParameterOutOfRange),
            partial.extend(HEADER_SIZE + 5, &full[HEADER_SIZE + 5..])
        );
    }

    #[test]
    fn partial_rejects_overrun_and_short_finish() {
        let full = record_bytes(4);

        let mut partial = PartialSdr::begin(3, &full[..HEADER_SIZE + 2]).unwrap();
        assert_eq!(
            Err(CompletionCode::RecordLengthInvalid),
            partial.extend(HEADER_SIZE + 2, &[0u8; 8])
        );

        let partial = PartialSdr::begin(3, &full[..HEADER_SIZE + 2]).unwrap();
        assert_eq!(
            Err(CompletionCode::RecordLengthInvalid),
            partial.finish()
        );
    }
}
