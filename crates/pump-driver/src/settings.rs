//! Per-address device configuration.
//!
//! A [`DeviceSettings`] bundles the scalar parameters and the program of one
//! pump. Program files hold a list of [`ConfigRecord`]s, each naming the
//! addresses it applies to. Apply and read walk the explicit [`Parameter`]
//! list, so each parameter kind maps to exactly one accessor pair.

use crate::commands::ComMode;
use crate::phase::Program;
use crate::session::PumpSession;
use crate::trigger::{TriggerFormat, TriggerReading, TriggerSetup};
use pump_core::limits::ADDRESS;
use pump_core::{PumpError, PumpResult};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Keyword selecting every address found by scanning.
pub const ALL_ADDRESSES: &str = "all";

/// Scalar parameters and program of one pump. Absent fields are left alone
/// on apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diameter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub com_mode: Option<ComMode>,
    /// Alarm buzzer mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<bool>,
    /// Restart the program after a power failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSetup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_beep: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<Program>,
}

/// Settings read from one address.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub address: u8,
    pub settings: DeviceSettings,
}

/// Parameter kinds, in the order they are applied. The program goes last so
/// a diameter change is in place before volumes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Diameter,
    ComMode,
    Alarm,
    PowerFail,
    Trigger,
    KeyBeep,
    Program,
}

impl Parameter {
    pub const ALL: [Parameter; 7] = [
        Parameter::Diameter,
        Parameter::ComMode,
        Parameter::Alarm,
        Parameter::PowerFail,
        Parameter::Trigger,
        Parameter::KeyBeep,
        Parameter::Program,
    ];

    /// Key of this parameter in a program file record.
    pub fn key(&self) -> &'static str {
        match self {
            Parameter::Diameter => "diameter",
            Parameter::ComMode => "com_mode",
            Parameter::Alarm => "alarm",
            Parameter::PowerFail => "power_fail",
            Parameter::Trigger => "trigger",
            Parameter::KeyBeep => "key_beep",
            Parameter::Program => "program",
        }
    }

    fn is_set_in(&self, settings: &DeviceSettings) -> bool {
        match self {
            Parameter::Diameter => settings.diameter.is_some(),
            Parameter::ComMode => settings.com_mode.is_some(),
            Parameter::Alarm => settings.alarm.is_some(),
            Parameter::PowerFail => settings.power_fail.is_some(),
            Parameter::Trigger => settings.trigger.is_some(),
            Parameter::KeyBeep => settings.key_beep.is_some(),
            Parameter::Program => settings.program.is_some(),
        }
    }
}

// =============================================================================
// Address sets
// =============================================================================

/// Addresses a record applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAddressSpec", into = "RawAddressSpec")]
pub enum AddressSpec {
    Single(u8),
    List(Vec<u8>),
    /// Every address found by scanning the bus.
    All,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawAddressSpec {
    Single(u8),
    List(Vec<u8>),
    Keyword(String),
}

impl TryFrom<RawAddressSpec> for AddressSpec {
    type Error = String;

    fn try_from(raw: RawAddressSpec) -> Result<Self, Self::Error> {
        match raw {
            RawAddressSpec::Single(address) => Ok(AddressSpec::Single(address)),
            RawAddressSpec::List(addresses) => Ok(AddressSpec::List(addresses)),
            RawAddressSpec::Keyword(k) if k == ALL_ADDRESSES => Ok(AddressSpec::All),
            RawAddressSpec::Keyword(k) => Err(format!("invalid address: {:?}", k)),
        }
    }
}

impl From<AddressSpec> for RawAddressSpec {
    fn from(spec: AddressSpec) -> Self {
        match spec {
            AddressSpec::Single(address) => RawAddressSpec::Single(address),
            AddressSpec::List(addresses) => RawAddressSpec::List(addresses),
            AddressSpec::All => RawAddressSpec::Keyword(ALL_ADDRESSES.to_string()),
        }
    }
}

impl AddressSpec {
    /// One address stays scalar; several become a list.
    pub fn from_addresses(mut addresses: Vec<u8>) -> Self {
        if addresses.len() == 1 {
            AddressSpec::Single(addresses.remove(0))
        } else {
            AddressSpec::List(addresses)
        }
    }
}

/// One record of a program file: settings shared by a set of addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub address: AddressSpec,
    #[serde(flatten)]
    pub settings: DeviceSettings,
}

/// Merge configs whose settings are identical.
///
/// Equality is deep and order-sensitive (two programs with the same steps
/// in a different order differ). Records come out in order of first
/// appearance; addresses inside a record keep their input order.
pub fn combine(configs: &[DeviceConfig]) -> Vec<ConfigRecord> {
    let mut groups: Vec<(&DeviceSettings, Vec<u8>)> = Vec::new();
    for config in configs {
        match groups.iter_mut().find(|(s, _)| **s == config.settings) {
            Some((_, addresses)) => addresses.push(config.address),
            None => groups.push((&config.settings, vec![config.address])),
        }
    }
    groups
        .into_iter()
        .map(|(settings, addresses)| ConfigRecord {
            address: AddressSpec::from_addresses(addresses),
            settings: settings.clone(),
        })
        .collect()
}

impl PumpSession {
    /// Expand an address set to concrete addresses.
    ///
    /// `All` uses the cached scan result, scanning once if there is none.
    pub async fn resolve_addresses(&self, spec: &AddressSpec) -> PumpResult<Vec<u8>> {
        let addresses = match spec {
            AddressSpec::Single(address) => vec![*address],
            AddressSpec::List(addresses) if addresses.is_empty() => {
                return Err(PumpError::Configuration(
                    "address list is empty".to_string(),
                ))
            }
            AddressSpec::List(addresses) => addresses.clone(),
            AddressSpec::All => match self.known_addresses() {
                Some(addresses) => addresses,
                None => self.scan_addresses().await?,
            },
        };
        for address in &addresses {
            ADDRESS.check((*address).into())?;
        }
        Ok(addresses)
    }

    /// Apply one record to every address it names.
    #[instrument(skip(self, record), fields(address = ?record.address), err)]
    pub async fn write_config(&self, record: &ConfigRecord) -> PumpResult<()> {
        // Catch program errors before touching any pump.
        if let Some(program) = &record.settings.program {
            crate::program::compile_program(0, program)?;
        }
        for address in self.resolve_addresses(&record.address).await? {
            for parameter in Parameter::ALL {
                if parameter.is_set_in(&record.settings) {
                    self.apply_parameter(address, parameter, &record.settings)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn apply_parameter(
        &self,
        address: u8,
        parameter: Parameter,
        settings: &DeviceSettings,
    ) -> PumpResult<()> {
        match parameter {
            Parameter::Diameter => match settings.diameter {
                Some(diameter) => self.set_diameter(address, diameter).await,
                None => Ok(()),
            },
            Parameter::ComMode => match settings.com_mode {
                Some(mode) => self.set_com_mode(address, mode).await,
                None => Ok(()),
            },
            Parameter::Alarm => match settings.alarm {
                Some(alarm) => self.set_alarm(address, alarm).await,
                None => Ok(()),
            },
            Parameter::PowerFail => match settings.power_fail {
                Some(restart) => self.set_power_fail(address, restart).await,
                None => Ok(()),
            },
            Parameter::Trigger => match &settings.trigger {
                Some(trigger) => self.set_trigger(address, trigger).await,
                None => Ok(()),
            },
            Parameter::KeyBeep => match settings.key_beep {
                Some(enabled) => self.set_key_beep(address, enabled).await,
                None => Ok(()),
            },
            Parameter::Program => match &settings.program {
                Some(program) => self.write_program(address, program).await,
                None => Ok(()),
            },
        }
    }

    /// Read every parameter of the pump at `address`.
    #[instrument(skip(self), err)]
    pub async fn read_config(&self, address: u8) -> PumpResult<DeviceConfig> {
        let mut settings = DeviceSettings::default();
        for parameter in Parameter::ALL {
            self.read_parameter(address, parameter, &mut settings)
                .await?;
        }
        Ok(DeviceConfig { address, settings })
    }

    async fn read_parameter(
        &self,
        address: u8,
        parameter: Parameter,
        settings: &mut DeviceSettings,
    ) -> PumpResult<()> {
        match parameter {
            Parameter::Diameter => settings.diameter = Some(self.get_diameter(address).await?),
            Parameter::ComMode => settings.com_mode = Some(self.get_com_mode(address).await?),
            Parameter::Alarm => settings.alarm = Some(self.get_alarm(address).await?),
            Parameter::PowerFail => {
                settings.power_fail = Some(self.get_power_fail(address).await?)
            }
            Parameter::Trigger => {
                if let TriggerReading::Name(name) =
                    self.get_trigger(address, TriggerFormat::Name).await?
                {
                    settings.trigger = Some(TriggerSetup::named(name));
                }
            }
            Parameter::KeyBeep => settings.key_beep = Some(self.get_key_beep(address).await?),
            Parameter::Program => settings.program = Some(self.read_program(address).await?),
        }
        Ok(())
    }

    /// Read several addresses and merge identical configurations.
    pub async fn read_configs(&self, spec: &AddressSpec) -> PumpResult<Vec<ConfigRecord>> {
        let mut configs = Vec::new();
        for address in self.resolve_addresses(spec).await? {
            configs.push(self.read_config(address).await?);
        }
        Ok(combine(&configs))
    }
}
