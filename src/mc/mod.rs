//! The management-controller model and its command handlers.

use std::collections::BTreeMap;

use bitflags::bitflags;
use nonmax::NonMaxU8;

use crate::proto::{CompletionCode, LogicalUnit, NetFn};
use crate::sensor::{EventDirection, EventRequest, Sensor};
use crate::storage::{
    wall_clock_secs, FruInventory, PartialSdr, Sel, SelFlags, SdrFlags, SdrRepository, UpdateMode,
};
use crate::ConfigError;

pub mod app;
pub mod oem;
pub mod sensor_event;
pub mod storage;

bitflags! {
    /// Capabilities advertised in byte 6 of the Get Device ID response.
    pub struct DeviceSupport: u8 {
        const SENSOR = 0x01;
        const SDR_REPOSITORY = 0x02;
        const SEL_DEVICE = 0x04;
        const FRU_INVENTORY = 0x08;
        const IPMB_EVENT_RECEIVER = 0x10;
        const IPMB_EVENT_GENERATOR = 0x20;
        const BRIDGE = 0x40;
        const CHASSIS = 0x80;
    }
}

/// Identity and capabilities of a new MC, as the configuration loader
/// provides them.
#[derive(Debug, Clone)]
pub struct McConfig {
    pub ipmb: u8,
    pub device_id: u8,
    pub has_device_sdrs: bool,
    /// Four-bit hardware revision.
    pub device_revision: u8,
    /// Seven-bit major firmware revision.
    pub major_fw_revision: u8,
    pub minor_fw_revision: u8,
    pub device_support: DeviceSupport,
    pub manufacturer_id: [u8; 3],
    pub product_id: [u8; 2],
    pub dynamic_sensor_population: bool,
}

/// An event on its way to the SEL of the configured event receiver. The
/// 13 data bytes are the record body following the record type; byte 0
/// starts the timestamp the receiving SEL rewrites.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub receiver: u8,
    pub record_type: u8,
    pub data: [u8; 13],
}

/// A response hook lets an embedder inspect or rewrite the formatted
/// response of this MC before it is returned; clearing the buffer
/// consumes the response entirely.
pub type ResponseHook = Box<dyn FnMut(NetFn, u8, &mut Vec<u8>) + Send>;

/// One emulated management controller.
pub struct Mc {
    device_id: u8,
    has_device_sdrs: bool,
    device_revision: u8,
    major_fw_revision: u8,
    minor_fw_revision: u8,
    device_support: DeviceSupport,
    manufacturer_id: [u8; 3],
    product_id: [u8; 2],
    ipmb: u8,
    dynamic_sensor_population: bool,

    event_receiver: u8,
    event_receiver_lun: u8,

    sel: Sel,
    main_sdrs: SdrRepository,
    device_sdrs: [SdrRepository; 4],
    frus: FruInventory,
    sensors: [BTreeMap<u8, Sensor>; 4],

    power: u8,
    in_update_mode: bool,
    part_add: Option<PartialSdr>,
    sensor_population_change: u32,

    response_hook: Option<ResponseHook>,
}

impl Mc {
    pub(crate) fn new(config: McConfig) -> Self {
        Self {
            device_id: config.device_id,
            has_device_sdrs: config.has_device_sdrs,
            device_revision: config.device_revision & 0x0F,
            major_fw_revision: config.major_fw_revision & 0x7F,
            minor_fw_revision: config.minor_fw_revision,
            device_support: config.device_support,
            manufacturer_id: config.manufacturer_id,
            product_id: config.product_id,
            ipmb: config.ipmb,
            dynamic_sensor_population: config.dynamic_sensor_population,
            event_receiver: 0,
            event_receiver_lun: 0,
            sel: Sel::new(),
            main_sdrs: SdrRepository::new(),
            device_sdrs: std::array::from_fn(|_| SdrRepository::new()),
            frus: FruInventory::new(),
            sensors: Default::default(),
            power: 0,
            in_update_mode: false,
            part_add: None,
            sensor_population_change: 0,
            response_hook: None,
        }
    }

    /// Execute one request against this MC and format the full response,
    /// completion code included.
    pub(crate) fn handle_msg(
        &mut self,
        lun: LogicalUnit,
        netfn: NetFn,
        cmd: u8,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Vec<u8> {
        let result = match netfn {
            NetFn::App => app::handle(self, cmd, data),
            NetFn::SensorEvent => sensor_event::handle(self, lun, cmd, data, events),
            NetFn::Storage => storage::handle(self, cmd, data),
            NetFn::Oem0 => oem::handle(self, cmd, data, events),
            NetFn::Unknown(v) => {
                log::debug!("request for unsupported netfn 0x{v:02X}");
                Err(CompletionCode::InvalidCommand)
            }
        };

        let mut rsp = match result {
            Ok(payload) => {
                let mut rsp = Vec::with_capacity(1 + payload.len());
                rsp.push(CompletionCode::Success.value());
                rsp.extend_from_slice(&payload);
                rsp
            }
            Err(code) => vec![code.value()],
        };

        if let Some(hook) = self.response_hook.as_mut() {
            hook(netfn, cmd, &mut rsp);
        }

        rsp
    }

    pub fn ipmb(&self) -> u8 {
        self.ipmb
    }

    pub fn device_support(&self) -> DeviceSupport {
        self.device_support
    }

    pub fn event_receiver(&self) -> u8 {
        self.event_receiver
    }

    /// Point events from this MC at another controller's SEL; address 0
    /// disables generation.
    pub fn set_event_receiver(&mut self, ipmb: u8, lun: u8) {
        self.event_receiver = ipmb & 0xFE;
        self.event_receiver_lun = lun & 0x03;
    }

    pub fn power(&self) -> u8 {
        self.power
    }

    pub fn sel(&self) -> &Sel {
        &self.sel
    }

    pub(crate) fn sel_mut(&mut self) -> &mut Sel {
        &mut self.sel
    }

    /// Reset the SEL to an enabled, empty log.
    pub fn enable_sel(&mut self, max_entries: u16, flags: SelFlags) {
        self.sel.enable(max_entries, flags);
    }

    pub fn main_sdrs(&self) -> &SdrRepository {
        &self.main_sdrs
    }

    pub fn device_sdrs(&self, lun: LogicalUnit) -> &SdrRepository {
        &self.device_sdrs[lun.value() as usize]
    }

    /// Replace the main repository's support flags and modal mode.
    pub fn configure_main_sdrs(&mut self, flags: SdrFlags, update_mode: UpdateMode) {
        self.main_sdrs.configure(flags, update_mode);
    }

    /// Add a raw record to the main SDR repository.
    pub fn add_main_sdr(&mut self, data: &[u8]) -> Result<u16, ConfigError> {
        self.main_sdrs.insert_raw(data)
    }

    /// Add a raw record to the device SDR repository of `lun`.
    pub fn add_device_sdr(&mut self, lun: LogicalUnit, data: &[u8]) -> Result<u16, ConfigError> {
        self.device_sdrs[lun.value() as usize].insert_raw(data)
    }

    pub fn fru(&self) -> &FruInventory {
        &self.frus
    }

    /// Install the FRU data buffer behind a device id.
    pub fn add_fru_data(&mut self, device_id: NonMaxU8, data: Vec<u8>) -> Result<(), ConfigError> {
        self.frus.add_device(device_id, data)
    }

    /// Create a sensor on a LUN. Sensor numbers are unique per LUN and
    /// sensors live as long as the MC.
    pub fn add_sensor(
        &mut self,
        lun: LogicalUnit,
        num: NonMaxU8,
        sensor_type: u8,
        event_reading_code: u8,
    ) -> Result<&mut Sensor, ConfigError> {
        let table = &mut self.sensors[lun.value() as usize];

        if table.contains_key(&num.get()) {
            return Err(ConfigError::DuplicateSensor {
                lun,
                num: num.get(),
            });
        }

        self.sensor_population_change = wall_clock_secs() as u32;

        Ok(table
            .entry(num.get())
            .or_insert_with(|| Sensor::new(num, lun, sensor_type, event_reading_code)))
    }

    pub fn sensor(&self, lun: LogicalUnit, num: u8) -> Option<&Sensor> {
        self.sensors[lun.value() as usize].get(&num)
    }

    pub fn sensor_mut(&mut self, lun: LogicalUnit, num: u8) -> Option<&mut Sensor> {
        self.sensors[lun.value() as usize].get_mut(&num)
    }

    /// Install a response hook for the embedding transport.
    pub fn set_response_hook(&mut self, hook: ResponseHook) {
        self.response_hook = Some(hook);
    }

    pub(crate) fn set_sensor_value(
        &mut self,
        lun: LogicalUnit,
        num: u8,
        value: u8,
        gen_event: bool,
        out: &mut Vec<Event>,
    ) -> Result<(), ConfigError> {
        let mut requests = Vec::new();

        self.sensors[lun.value() as usize]
            .get_mut(&num)
            .ok_or(ConfigError::SensorNotPresent { lun, num })?
            .set_value_internal(value, &mut requests);

        self.queue_sensor_events(lun, num, &requests, gen_event, out);

        Ok(())
    }

    pub(crate) fn set_sensor_bit(
        &mut self,
        lun: LogicalUnit,
        num: u8,
        bit: u8,
        value: bool,
        gen_event: bool,
        out: &mut Vec<Event>,
    ) -> Result<(), ConfigError> {
        if bit >= 15 {
            return Err(ConfigError::EventBitOutOfRange(bit));
        }

        let mut requests = Vec::new();

        self.sensors[lun.value() as usize]
            .get_mut(&num)
            .ok_or(ConfigError::SensorNotPresent { lun, num })?
            .set_bit_internal(bit, value, &mut requests);

        self.queue_sensor_events(lun, num, &requests, gen_event, out);

        Ok(())
    }

    /// Turn a sensor's event requests into routable SEL records.
    pub(crate) fn queue_sensor_events(
        &self,
        lun: LogicalUnit,
        num: u8,
        requests: &[EventRequest],
        gen_event: bool,
        out: &mut Vec<Event>,
    ) {
        let Some(sensor) = self.sensor(lun, num) else {
            return;
        };

        if self.event_receiver == 0 || !sensor.events_enabled() || !gen_event {
            return;
        }

        for request in requests {
            let direction = match request.direction {
                EventDirection::Assert => 0x00,
                EventDirection::Deassert => 0x80,
            };

            let mut data = [0u8; 13];
            // Bytes 0..4 are the timestamp the receiving SEL rewrites.
            data[4] = self.ipmb;
            data[5] = sensor.lun().value();
            data[6] = 0x04; // event message revision, IPMI 1.5
            data[7] = sensor.sensor_type();
            data[8] = sensor.num();
            data[9] = direction | sensor.event_reading_code();
            data[10..13].copy_from_slice(&request.data);

            out.push(Event {
                receiver: self.event_receiver,
                record_type: 0x02,
                data,
            });
        }
    }

    /// Change the stored power value; a change with `gen_event` set and
    /// an event receiver configured emits an OEM control event.
    pub(crate) fn set_power(&mut self, value: u8, gen_event: bool, out: &mut Vec<Event>) {
        if value == self.power {
            return;
        }

        self.power = value;

        if !gen_event || self.event_receiver == 0 {
            return;
        }

        let mut data = [0u8; 13];
        data[4] = 0x20;
        data[10] = value;

        out.push(Event {
            receiver: self.event_receiver,
            record_type: 0xC0,
            data,
        });
    }
}
