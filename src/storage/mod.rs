//! The record repositories owned by a management controller.

mod fru;
pub use fru::FruInventory;

mod sel;
pub use sel::{Sel, SelEntry, SelFlags, SEL_RECORD_SIZE};

mod sdr;
pub(crate) use sdr::PartialSdr;
pub use sdr::{SdrFlags, SdrRecord, SdrRepository, UpdateMode, MAX_SDR_LENGTH};

/// A second-resolution store timestamp: the wall clock shifted by the
/// owning repository's time offset.
///
/// Wire responses carry the raw `u32`; this type only exists to render
/// the value readably in diagnostics. With the `time` feature the
/// display is RFC 3339, falling back to the raw seconds whenever the
/// value does not format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(u32);

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(feature = "time")]
        if let Ok(text) = time::OffsetDateTime::from_unix_timestamp(self.0.into())
            .map_err(|_| ())
            .and_then(|stamp| {
                stamp
                    .format(&time::format_description::well_known::Rfc3339)
                    .map_err(|_| ())
            })
        {
            return write!(f, "{}", text);
        }

        write!(f, "{}", self.0)
    }
}

impl From<u32> for Timestamp {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Timestamp {
    pub fn value(&self) -> u32 {
        self.0
    }
}

pub(crate) fn wall_clock_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Allocate the next free record id, starting at `*next` and skipping 0,
/// 0xFFFF and ids `in_use`. The walk is bounded by the 16-bit id space;
/// exhausting it returns `None`.
///
/// 0 and 0xFFFF stay free because get/delete requests use them to mean
/// "first record" and "last record".
pub(crate) fn allocate_record_id(next: &mut u16, in_use: impl Fn(u16) -> bool) -> Option<u16> {
    let mut candidate = *next;

    for _ in 0..=u16::MAX as u32 {
        if candidate != 0 && candidate != 0xFFFF && !in_use(candidate) {
            *next = candidate.wrapping_add(1);
            return Some(candidate);
        }

        candidate = candidate.wrapping_add(1);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::allocate_record_id;

    #[test]
    fn record_id_allocation_skips_zero_and_last() {
        let mut next = 0xFFFE;

        assert_eq!(Some(0xFFFE), allocate_record_id(&mut next, |_| false));
        // 0xFFFF and 0 are reserved request values, so the wrap lands on 1.
        assert_eq!(Some(1), allocate_record_id(&mut next, |_| false));
        assert_eq!(2, next);
    }

    #[test]
    fn record_id_allocation_skips_in_use() {
        let mut next = 1;
        let used = [1u16, 2, 3];

        assert_eq!(
            Some(4),
            allocate_record_id(&mut next, |id| used.contains(&id))
        );
    }

    #[test]
    fn record_id_allocation_exhausts() {
        let mut next = 1;

        assert_eq!(None, allocate_record_id(&mut next, |_| true));
    }
}
