use crate::codec::ipmb_checksum;
use crate::mc::{app, Event, Mc, McConfig};
use crate::proto::{CompletionCode, LogicalUnit, NetFn};
use crate::ConfigError;

const NUM_MC_SLOTS: usize = 128;

/// One emulation domain: up to 128 management controllers addressed by
/// IPMB slave address, one of which is the BMC the transport talks to.
///
/// [`Emulator::handle_msg`] is the single wire entry point; it runs to
/// completion, so a caller that serializes requests per domain needs no
/// further synchronization.
pub struct Emulator {
    mcs: Vec<Option<Mc>>,
    bmc_ipmb: u8,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            mcs: (0..NUM_MC_SLOTS).map(|_| None).collect(),
            bmc_ipmb: 0x20,
        }
    }

    pub fn bmc_address(&self) -> u8 {
        self.bmc_ipmb
    }

    pub fn set_bmc_address(&mut self, ipmb: u8) -> Result<(), ConfigError> {
        if ipmb & 1 != 0 {
            return Err(ConfigError::OddIpmbAddress(ipmb));
        }

        self.bmc_ipmb = ipmb;

        Ok(())
    }

    /// Create a controller at its IPMB address. A controller already at
    /// that slot is destroyed along with everything it owns.
    pub fn add_mc(&mut self, config: McConfig) -> Result<&mut Mc, ConfigError> {
        let slot = Self::slot(config.ipmb)?;

        if self.mcs[slot].is_some() {
            log::debug!("replacing MC at IPMB 0x{:02X}", config.ipmb);
        }

        Ok(self.mcs[slot].insert(Mc::new(config)))
    }

    pub fn remove_mc(&mut self, ipmb: u8) {
        if let Ok(slot) = Self::slot(ipmb) {
            self.mcs[slot] = None;
        }
    }

    pub fn mc(&self, ipmb: u8) -> Option<&Mc> {
        self.mcs[(ipmb >> 1) as usize].as_ref()
    }

    pub fn mc_mut(&mut self, ipmb: u8) -> Option<&mut Mc> {
        self.mcs[(ipmb >> 1) as usize].as_mut()
    }

    fn slot(ipmb: u8) -> Result<usize, ConfigError> {
        if ipmb & 1 != 0 {
            return Err(ConfigError::OddIpmbAddress(ipmb));
        }

        Ok((ipmb >> 1) as usize)
    }

    /// Handle one raw request (`[netfn << 2 | lun, cmd, data…]`) and
    /// return the raw response (`[completion code, data…]`).
    pub fn handle_msg(&mut self, lun: LogicalUnit, request: &[u8]) -> Vec<u8> {
        if request.len() < 2 {
            return vec![CompletionCode::RequestDataLengthInvalid.value()];
        }

        let netfn = NetFn::from(request[0] >> 2);
        let cmd = request[1];
        let data = &request[2..];

        log::debug!(
            "request: netfn {netfn:?} cmd 0x{cmd:02X}, {} data bytes",
            data.len()
        );

        if netfn == NetFn::App && cmd == app::SEND_MSG {
            return self.handle_send_msg(data);
        }

        let bmc_slot = (self.bmc_ipmb >> 1) as usize;
        let Some(mc) = self.mcs[bmc_slot].as_mut() else {
            log::warn!("no MC at the BMC address 0x{:02X}", self.bmc_ipmb);
            return vec![CompletionCode::Unspecified.value()];
        };

        let mut events = Vec::new();
        let rsp = mc.handle_msg(lun, netfn, cmd, data, &mut events);
        self.deliver_events(events);

        rsp
    }

    /// Unwrap a Send Message request, run the inner request against the
    /// addressed controller and wrap the response in an IPMB frame.
    fn handle_send_msg(&mut self, data: &[u8]) -> Vec<u8> {
        let Some((channel, body)) = data.split_first() else {
            return vec![CompletionCode::RequestDataLengthInvalid.value()];
        };

        // Only channel 0, no tracking: the low six bits must be clear.
        if channel & 0x3F != 0 {
            return vec![CompletionCode::InvalidDataField.value()];
        }

        // A leading zero byte is the broadcast address; skip it.
        let body = match body.first() {
            Some(0x00) => &body[1..],
            _ => body,
        };

        if body.len() < 7 {
            log::warn!("malformed encapsulated message ({} bytes)", body.len());
            return vec![CompletionCode::RequestDataLengthInvalid.value()];
        }

        let dest = body[0];
        let netfn_byte = body[1];
        let seq_byte = body[4];
        let inner_cmd = body[5];
        // The payload ends one byte early: the trailing IPMB checksum.
        let inner_data = &body[6..body.len() - 1];

        let netfn = NetFn::from(netfn_byte >> 2);
        let dest_lun = LogicalUnit::from_wire(netfn_byte);

        let slot = (dest >> 1) as usize;
        let Some(mc) = self.mcs[slot].as_mut() else {
            log::debug!("no MC at IPMB 0x{dest:02X}, NAK");
            return vec![CompletionCode::NakOnWrite.value()];
        };

        let mut events = Vec::new();
        let inner_rsp = mc.handle_msg(dest_lun, netfn, inner_cmd, inner_data, &mut events);
        self.deliver_events(events);

        let rsp_netfn_byte = (netfn.response_value() << 2) | dest_lun.value();

        let mut rsp = Vec::with_capacity(8 + inner_rsp.len());
        rsp.push(CompletionCode::Success.value());
        rsp.push(self.bmc_ipmb);
        rsp.push(rsp_netfn_byte);
        rsp.push(ipmb_checksum(&[self.bmc_ipmb, rsp_netfn_byte], 0));
        rsp.push(dest);
        rsp.push((seq_byte & 0xFC) | (dest_lun.value() & 0x03));
        rsp.push(inner_cmd);
        rsp.extend_from_slice(&inner_rsp);
        let trailer = ipmb_checksum(&rsp[4..], 0);
        rsp.push(trailer);

        rsp
    }

    /// Append queued events to the SELs of their receivers. A missing
    /// receiver drops the event without failing the originating call.
    fn deliver_events(&mut self, events: Vec<Event>) {
        for event in events {
            let slot = (event.receiver >> 1) as usize;

            match self.mcs[slot].as_mut() {
                Some(mc) => {
                    if !mc.sel_mut().add_event(event.record_type, &event.data) {
                        log::warn!(
                            "SEL of 0x{:02X} dropped event of type 0x{:02X}",
                            event.receiver,
                            event.record_type
                        );
                    }
                }
                None => {
                    log::warn!("event receiver 0x{:02X} not present", event.receiver);
                }
            }
        }
    }

    /// Set a sensor's value, re-run threshold checking and deliver any
    /// resulting events.
    pub fn set_sensor_value(
        &mut self,
        ipmb: u8,
        lun: LogicalUnit,
        num: u8,
        value: u8,
        gen_event: bool,
    ) -> Result<(), ConfigError> {
        let mut events = Vec::new();

        self.mc_mut(ipmb)
            .ok_or(ConfigError::McNotPresent(ipmb))?
            .set_sensor_value(lun, num, value, gen_event, &mut events)?;

        self.deliver_events(events);

        Ok(())
    }

    /// Set or clear a discrete sensor's event bit (0..15).
    pub fn set_sensor_bit(
        &mut self,
        ipmb: u8,
        lun: LogicalUnit,
        num: u8,
        bit: u8,
        value: bool,
        gen_event: bool,
    ) -> Result<(), ConfigError> {
        let mut events = Vec::new();

        self.mc_mut(ipmb)
            .ok_or(ConfigError::McNotPresent(ipmb))?
            .set_sensor_bit(lun, num, bit, value, gen_event, &mut events)?;

        self.deliver_events(events);

        Ok(())
    }

    /// Set a controller's power value, emitting the OEM control event on
    /// change when requested.
    pub fn set_power(
        &mut self,
        ipmb: u8,
        value: u8,
        gen_event: bool,
    ) -> Result<(), ConfigError> {
        let mut events = Vec::new();

        self.mc_mut(ipmb)
            .ok_or(ConfigError::McNotPresent(ipmb))?
            .set_power(value, gen_event, &mut events);

        self.deliver_events(events);

        Ok(())
    }
}
