//! bmc-emu: a pure-rust in-memory emulator of IPMI management controllers.
//!
//! The crate models an emulation domain ([`Emulator`]) holding up to 128
//! management controllers addressed by IPMB slave address. Each controller
//! ([`mc::Mc`]) owns a System Event Log, a main and four per-LUN device SDR
//! repositories, FRU inventory areas and a sensor table (in the [`storage`]
//! and [`sensor`] modules).
//!
//! A transport feeds raw IPMI request payloads to [`Emulator::handle_msg`]
//! and sends back the returned response bytes; `Send Message` requests are
//! unwrapped, bridged to the addressed controller and re-wrapped in an IPMB
//! frame. Sensor threshold crossings and power changes synthesize event
//! records into the SEL of the configured event receiver within the same
//! domain.
//!
//! Everything is plain in-memory state: no I/O, no sessions, no
//! persistence.

pub mod codec;

mod error;
pub use error::ConfigError;

pub mod proto;

pub mod sensor;

pub mod storage;

pub mod mc;
pub use mc::{DeviceSupport, Mc, McConfig};

mod emulator;
pub use emulator::Emulator;
