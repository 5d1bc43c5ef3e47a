use bitflags::bitflags;

use crate::codec::{get_u16_le, get_u32_le, set_u16_le, set_u32_le};
use crate::proto::{CmdResult, CompletionCode};

use super::{allocate_record_id, wall_clock_secs, Timestamp};

/// Every SEL record is exactly 16 bytes on the wire.
pub const SEL_RECORD_SIZE: usize = 16;

/// Record types at or above this value are OEM records whose body,
/// including the caller-supplied timestamp, is stored verbatim.
const UNTIMESTAMPED_OEM_BOUNDARY: u8 = 0xE0;

bitflags! {
    /// Operation-support bits of the SEL info response, plus the overflow
    /// bit the log sets when an addition is refused or dropped for space.
    pub struct SelFlags: u8 {
        const GET_ALLOC_INFO = 0x01;
        const RESERVE = 0x02;
        const PARTIAL_ADD = 0x04;
        const DELETE = 0x08;
        const OVERFLOW = 0x80;
    }
}

/// The support bits a caller may choose when enabling a SEL. Partial add
/// is not implemented, and overflow is owned by the log itself.
const CONFIGURABLE_FLAGS: SelFlags = SelFlags::from_bits_truncate(0x0B);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelEntry {
    data: [u8; SEL_RECORD_SIZE],
}

impl SelEntry {
    pub fn record_id(&self) -> u16 {
        get_u16_le(&self.data, 0)
    }

    pub fn record_type(&self) -> u8 {
        self.data[2]
    }

    pub fn data(&self) -> &[u8; SEL_RECORD_SIZE] {
        &self.data
    }
}

/// The System Event Log of one management controller.
///
/// A freshly created log is disabled; every command is refused until the
/// configuration API enables it with a capacity and support flags.
#[derive(Debug)]
pub struct Sel {
    entries: Vec<SelEntry>,
    max_entries: u16,
    flags: SelFlags,
    reservation: u16,
    next_entry: u16,
    last_add_time: u32,
    last_erase_time: u32,
    time_offset: i64,
}

impl Sel {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: 0,
            flags: SelFlags::empty(),
            reservation: 0,
            next_entry: 1,
            last_add_time: 0,
            last_erase_time: 0,
            time_offset: 0,
        }
    }

    /// Reset to an empty log with the given capacity and support flags.
    pub fn enable(&mut self, max_entries: u16, flags: SelFlags) {
        *self = Self {
            max_entries,
            flags: flags & CONFIGURABLE_FLAGS,
            ..Self::new()
        };
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SelEntry] {
        &self.entries
    }

    pub fn reservation(&self) -> u16 {
        self.reservation
    }

    fn now(&self) -> u32 {
        (wall_clock_secs() + self.time_offset) as u32
    }

    fn require_enabled(&self) -> Result<(), CompletionCode> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(CompletionCode::InvalidCommand)
        }
    }

    /// A nonzero reservation that does not match the current one is
    /// refused; zero means "no reservation supplied".
    fn check_reservation(&self, supplied: u16) -> Result<(), CompletionCode> {
        if self.flags.contains(SelFlags::RESERVE) && supplied != 0 && supplied != self.reservation {
            Err(CompletionCode::InvalidReservation)
        } else {
            Ok(())
        }
    }

    /// Resolve the 0 / 0xFFFF / specific record-id request convention to
    /// an index into the live list.
    fn index_of(&self, record_id: u16) -> Result<usize, CompletionCode> {
        if self.entries.is_empty() {
            return Err(CompletionCode::NotPresent);
        }

        match record_id {
            0x0000 => Ok(0),
            0xFFFF => Ok(self.entries.len() - 1),
            id => self
                .entries
                .iter()
                .position(|e| e.record_id() == id)
                .ok_or(CompletionCode::NotPresent),
        }
    }

    pub(crate) fn get_info(&mut self) -> CmdResult {
        self.require_enabled()?;

        let count = self.entries.len() as u16;
        let free = (16 * (self.max_entries - count) as u32).min(0xFFFE) as u16;

        let mut rsp = vec![0u8; 14];
        rsp[0] = 0x51;
        set_u16_le(&mut rsp, 1, count);
        set_u16_le(&mut rsp, 3, free);
        set_u32_le(&mut rsp, 5, self.last_add_time);
        set_u32_le(&mut rsp, 9, self.last_erase_time);
        rsp[13] = self.flags.bits();

        // Reading the info acknowledges a previous overflow.
        self.flags.remove(SelFlags::OVERFLOW);

        Ok(rsp)
    }

    pub(crate) fn get_alloc_info(&self) -> CmdResult {
        self.require_enabled()?;

        if !self.flags.contains(SelFlags::GET_ALLOC_INFO) {
            return Err(CompletionCode::InvalidCommand);
        }

        let free = self.max_entries - self.entries.len() as u16;

        let mut rsp = vec![0u8; 9];
        set_u16_le(&mut rsp, 0, self.max_entries);
        set_u16_le(&mut rsp, 2, SEL_RECORD_SIZE as u16);
        set_u16_le(&mut rsp, 4, free);
        set_u16_le(&mut rsp, 6, free);
        rsp[8] = 1;

        Ok(rsp)
    }

    pub(crate) fn reserve(&mut self) -> CmdResult {
        self.require_enabled()?;

        if !self.flags.contains(SelFlags::RESERVE) {
            return Err(CompletionCode::InvalidCommand);
        }

        self.reservation = self.reservation.wrapping_add(1);
        if self.reservation == 0 {
            self.reservation = 1;
        }

        Ok(self.reservation.to_le_bytes().to_vec())
    }

    pub(crate) fn get_entry(&self, data: &[u8]) -> CmdResult {
        self.require_enabled()?;

        if data.len() < 6 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        let index = self.index_of(get_u16_le(data, 2))?;
        let offset = data[4] as usize;
        let count = data[5] as usize;

        if offset >= SEL_RECORD_SIZE {
            return Err(CompletionCode::InvalidDataField);
        }

        let count = count.min(SEL_RECORD_SIZE - offset);
        let next = match self.entries.get(index + 1) {
            Some(entry) => entry.record_id(),
            None => 0xFFFF,
        };

        let mut rsp = Vec::with_capacity(2 + count);
        rsp.extend_from_slice(&next.to_le_bytes());
        rsp.extend_from_slice(&self.entries[index].data[offset..offset + count]);

        Ok(rsp)
    }

    /// Add SEL Entry. `data` is the 16-byte record from the request; the
    /// record id and, for system events, the timestamp are rewritten.
    pub(crate) fn add_entry(&mut self, data: &[u8]) -> CmdResult {
        self.require_enabled()?;

        if data.len() < SEL_RECORD_SIZE {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        let mut body = [0u8; 13];
        body.copy_from_slice(&data[3..SEL_RECORD_SIZE]);

        let id = self.insert_record(data[2], &body)?;

        Ok(id.to_le_bytes().to_vec())
    }

    /// Append a record built from a type byte and a 13-byte body, the
    /// form events arrive in. A full log sets the overflow flag.
    pub(crate) fn insert_record(
        &mut self,
        record_type: u8,
        body: &[u8; 13],
    ) -> Result<u16, CompletionCode> {
        if self.entries.len() >= self.max_entries as usize {
            self.flags.insert(SelFlags::OVERFLOW);
            return Err(CompletionCode::OutOfSpace);
        }

        let entries = &self.entries;
        let id = allocate_record_id(&mut self.next_entry, |id| {
            entries.iter().any(|e| e.record_id() == id)
        })
        .ok_or(CompletionCode::OutOfSpace)?;

        let now = self.now();

        let mut record = [0u8; SEL_RECORD_SIZE];
        set_u16_le(&mut record, 0, id);
        record[2] = record_type;

        if record_type < UNTIMESTAMPED_OEM_BOUNDARY {
            set_u32_le(&mut record, 3, now);
            record[7..16].copy_from_slice(&body[4..13]);
        } else {
            record[3..16].copy_from_slice(body);
        }

        log::debug!(
            "SEL add: record 0x{:04X} type 0x{:02X} at {}",
            id,
            record_type,
            Timestamp::from(now)
        );

        self.last_add_time = now;
        self.entries.push(SelEntry { data: record });

        Ok(id)
    }

    /// Append an internally generated event record. Returns `false` when
    /// the record was dropped (log disabled or full).
    pub(crate) fn add_event(&mut self, record_type: u8, body: &[u8; 13]) -> bool {
        if !self.is_enabled() {
            return false;
        }

        self.insert_record(record_type, body).is_ok()
    }

    pub(crate) fn delete_entry(&mut self, data: &[u8]) -> CmdResult {
        self.require_enabled()?;

        if !self.flags.contains(SelFlags::DELETE) {
            return Err(CompletionCode::InvalidCommand);
        }

        if data.len() < 4 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        let index = self.index_of(get_u16_le(data, 2))?;
        let id = self.entries.remove(index).record_id();

        Ok(id.to_le_bytes().to_vec())
    }

    pub(crate) fn clear(&mut self, data: &[u8]) -> CmdResult {
        self.require_enabled()?;

        if data.len() < 6 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.check_reservation(get_u16_le(data, 0))?;

        if &data[2..5] != b"CLR" {
            return Err(CompletionCode::InvalidDataField);
        }

        match data[5] {
            0x00 => {
                log::debug!("SEL clear: erasing {} entries", self.entries.len());
                self.entries.clear();
                self.last_erase_time = self.now();
            }
            0xAA => {}
            _ => return Err(CompletionCode::InvalidDataField),
        }

        // Erasure is instantaneous, so the progress byte is always
        // "erase completed".
        Ok(vec![0x01])
    }

    pub(crate) fn get_time(&self) -> CmdResult {
        self.require_enabled()?;

        Ok(self.now().to_le_bytes().to_vec())
    }

    pub(crate) fn set_time(&mut self, data: &[u8]) -> CmdResult {
        self.require_enabled()?;

        if data.len() < 4 {
            return Err(CompletionCode::RequestDataLengthInvalid);
        }

        self.time_offset = get_u32_le(data, 0) as i64 - wall_clock_secs();

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_sel() -> Sel {
        let mut sel = Sel::new();
        sel.enable(16, SelFlags::RESERVE | SelFlags::DELETE | SelFlags::GET_ALLOC_INFO);
        sel
    }

    fn system_record(ty: u8) -> [u8; 16] {
        let mut record = [0u8; 16];
        record[2] = ty;
        for (i, b) in record[7..].iter_mut().enumerate() {
            *b = 0x10 + i as u8;
        }
        record
    }

    #[test]
    fn disabled_log_refuses_commands() {
        let mut sel = Sel::new();

        assert_eq!(Err(CompletionCode::InvalidCommand), sel.get_info());
        assert_eq!(
            Err(CompletionCode::InvalidCommand),
            sel.add_entry(&system_record(0x02))
        );
    }

    #[test]
    fn add_assigns_record_id_and_stamps_time() {
        let mut sel = enabled_sel();

        let rsp = sel.add_entry(&system_record(0x02)).unwrap();
        assert_eq!(vec![1, 0], rsp);

        let entry = &sel.entries()[0];
        assert_eq!(1, entry.record_id());
        assert_eq!(0x02, entry.record_type());
        // Timestamp bytes were rewritten away from the request's zeros.
        assert_ne!([0u8; 4], entry.data()[3..7]);
        // Bytes 7.. survive from the request record.
        assert_eq!(&system_record(0x02)[7..], &entry.data()[7..]);
    }

    #[test]
    fn oem_record_is_stored_verbatim() {
        let mut sel = enabled_sel();

        let mut record = system_record(0xE5);
        record[3..7].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        sel.add_entry(&record).unwrap();

        let entry = &sel.entries()[0];
        assert_eq!(record[2..], entry.data()[2..]);
    }

    #[test]
    fn wrong_reservation_leaves_log_unchanged() {
        let mut sel = enabled_sel();
        sel.add_entry(&system_record(0x02)).unwrap();
        sel.reserve().unwrap();

        let mut req = vec![0u8; 4];
        req[0] = 0x55; // not the reservation we hold

        assert_eq!(Err(CompletionCode::InvalidReservation), sel.delete_entry(&req));
        assert_eq!(1, sel.entry_count());
    }

    #[test]
    fn zero_reservation_is_accepted() {
        let mut sel = enabled_sel();
        sel.add_entry(&system_record(0x02)).unwrap();
        sel.reserve().unwrap();

        assert!(sel.delete_entry(&[0, 0, 0xFF, 0xFF]).is_ok());
        assert_eq!(0, sel.entry_count());
    }

    #[test]
    fn full_log_sets_overflow() {
        let mut sel = Sel::new();
        sel.enable(1, SelFlags::empty());

        sel.add_entry(&system_record(0x02)).unwrap();
        assert_eq!(
            Err(CompletionCode::OutOfSpace),
            sel.add_entry(&system_record(0x02))
        );

        let info = sel.get_info().unwrap();
        assert_ne!(0, info[13] & SelFlags::OVERFLOW.bits());

        // Reading the info cleared the overflow bit.
        let info = sel.get_info().unwrap();
        assert_eq!(0, info[13] & SelFlags::OVERFLOW.bits());
    }

    #[test]
    fn get_entry_clamps_count_to_record_end() {
        let mut sel = enabled_sel();
        sel.add_entry(&system_record(0x02)).unwrap();

        // offset 12, count 0xFF: only 4 bytes remain.
        let rsp = sel.get_entry(&[0, 0, 1, 0, 12, 0xFF]).unwrap();
        assert_eq!(2 + 4, rsp.len());
        assert_eq!([0xFF, 0xFF], rsp[0..2]);

        assert_eq!(
            Err(CompletionCode::InvalidDataField),
            sel.get_entry(&[0, 0, 1, 0, 16, 1])
        );
    }

    #[test]
    fn delete_by_position_markers() {
        let mut sel = enabled_sel();
        sel.add_entry(&system_record(0x02)).unwrap();
        sel.add_entry(&system_record(0x02)).unwrap();
        sel.add_entry(&system_record(0x02)).unwrap();

        // 0xFFFF deletes the tail, 0 the head.
        assert_eq!(vec![3, 0], sel.delete_entry(&[0, 0, 0xFF, 0xFF]).unwrap());
        assert_eq!(vec![1, 0], sel.delete_entry(&[0, 0, 0, 0]).unwrap());
        assert_eq!(1, sel.entry_count());
        assert_eq!(2, sel.entries()[0].record_id());
    }

    #[test]
    fn clear_requires_magic() {
        let mut sel = enabled_sel();
        sel.add_entry(&system_record(0x02)).unwrap();

        assert_eq!(
            Err(CompletionCode::InvalidDataField),
            sel.clear(&[0, 0, b'C', b'L', b'X', 0x00])
        );
        assert_eq!(1, sel.entry_count());

        // 0xAA reads status without erasing.
        assert_eq!(Ok(vec![0x01]), sel.clear(&[0, 0, b'C', b'L', b'R', 0xAA]));
        assert_eq!(1, sel.entry_count());

        assert_eq!(Ok(vec![0x01]), sel.clear(&[0, 0, b'C', b'L', b'R', 0x00]));
        assert_eq!(0, sel.entry_count());
    }

    #[test]
    fn set_time_shifts_the_clock() {
        let mut sel = enabled_sel();

        sel.set_time(&0x2000_0000u32.to_le_bytes()).unwrap();
        let rsp = sel.get_time().unwrap();
        let read = u32::from_le_bytes([rsp[0], rsp[1], rsp[2], rsp[3]]);

        assert!(read.wrapping_sub(0x2000_0000) <= 1);
    }
}
