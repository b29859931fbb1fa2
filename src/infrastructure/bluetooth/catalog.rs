//! Capability Catalog
//!
//! The services and characteristics a peripheral must expose before a
//! session may become ready, and the validation walk over a discovery
//! result.

use crate::domain::error::BleError;
use crate::domain::models::{Attribute, Operations};
use crate::domain::settings::CatalogSettings;
use crate::infrastructure::bluetooth::transport::{CharacteristicHandle, DiscoveredService};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("invalid {field} UUID '{value}': {source}")]
    InvalidUuid {
        field: &'static str,
        value: String,
        #[source]
        source: uuid::Error,
    },
}

/// One characteristic the device must expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRequirement {
    pub attribute: Attribute,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub operations: Operations,
}

/// A discovered characteristic that satisfies its requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedCharacteristic {
    pub handle: CharacteristicHandle,
    pub properties: Operations,
}

/// One slot per required attribute. Empty slots mean "not matched".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchedCharacteristics {
    button_clicks: Option<MatchedCharacteristic>,
    temperature: Option<MatchedCharacteristic>,
    integer: Option<MatchedCharacteristic>,
    current_time: Option<MatchedCharacteristic>,
}

impl MatchedCharacteristics {
    pub fn get(&self, attribute: Attribute) -> Option<&MatchedCharacteristic> {
        match attribute {
            Attribute::ButtonClicks => self.button_clicks.as_ref(),
            Attribute::Temperature => self.temperature.as_ref(),
            Attribute::Integer => self.integer.as_ref(),
            Attribute::CurrentTime => self.current_time.as_ref(),
        }
    }

    fn slot_mut(&mut self, attribute: Attribute) -> &mut Option<MatchedCharacteristic> {
        match attribute {
            Attribute::ButtonClicks => &mut self.button_clicks,
            Attribute::Temperature => &mut self.temperature,
            Attribute::Integer => &mut self.integer,
            Attribute::CurrentTime => &mut self.current_time,
        }
    }

    pub fn handle(&self, attribute: Attribute) -> Option<CharacteristicHandle> {
        self.get(attribute).map(|matched| matched.handle)
    }

    /// Reverse lookup used to route notifications
    pub fn attribute_for(&self, handle: CharacteristicHandle) -> Option<Attribute> {
        Attribute::ALL
            .into_iter()
            .find(|attribute| self.handle(*attribute) == Some(handle))
    }

    pub fn is_complete(&self) -> bool {
        Attribute::ALL
            .into_iter()
            .all(|attribute| self.get(attribute).is_some())
    }
}

/// Immutable table of required services and characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCatalog {
    time_service: Uuid,
    sym_service: Uuid,
    requirements: [CapabilityRequirement; 4],
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::sym_pixl()
    }
}

fn parse(field: &'static str, value: &str) -> Result<Uuid, CatalogError> {
    Uuid::parse_str(value).map_err(|source| CatalogError::InvalidUuid {
        field,
        value: value.to_string(),
        source,
    })
}

impl CapabilityCatalog {
    /// Catalog of the SYM Pixl board with its built-in UUIDs
    pub fn sym_pixl() -> Self {
        Self::from_uuids(
            Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb),
            Uuid::from_u128(0x00002a2b_0000_1000_8000_00805f9b34fb),
            Uuid::from_u128(0x3c0a1000_281d_4b48_b2a7_f15579a1c38f),
            Uuid::from_u128(0x3c0a1001_281d_4b48_b2a7_f15579a1c38f),
            Uuid::from_u128(0x3c0a1002_281d_4b48_b2a7_f15579a1c38f),
            Uuid::from_u128(0x3c0a1003_281d_4b48_b2a7_f15579a1c38f),
        )
    }

    pub fn from_settings(settings: &CatalogSettings) -> Result<Self, CatalogError> {
        Ok(Self::from_uuids(
            parse("time service", &settings.time_service_uuid)?,
            parse("current time", &settings.current_time_uuid)?,
            parse("SYM service", &settings.sym_service_uuid)?,
            parse("integer", &settings.integer_uuid)?,
            parse("temperature", &settings.temperature_uuid)?,
            parse("button click", &settings.button_click_uuid)?,
        ))
    }

    fn from_uuids(
        time_service: Uuid,
        current_time: Uuid,
        sym_service: Uuid,
        integer: Uuid,
        temperature: Uuid,
        button_clicks: Uuid,
    ) -> Self {
        let requirement = |attribute, service, characteristic, operations| CapabilityRequirement {
            attribute,
            service,
            characteristic,
            operations,
        };
        Self {
            time_service,
            sym_service,
            requirements: [
                requirement(
                    Attribute::CurrentTime,
                    time_service,
                    current_time,
                    Operations::READ | Operations::NOTIFY,
                ),
                requirement(Attribute::Integer, sym_service, integer, Operations::WRITE),
                requirement(
                    Attribute::Temperature,
                    sym_service,
                    temperature,
                    Operations::READ,
                ),
                requirement(
                    Attribute::ButtonClicks,
                    sym_service,
                    button_clicks,
                    Operations::NOTIFY,
                ),
            ],
        }
    }

    pub fn services(&self) -> [Uuid; 2] {
        [self.time_service, self.sym_service]
    }

    pub fn requirements(&self) -> &[CapabilityRequirement] {
        &self.requirements
    }

    pub fn requirement(&self, attribute: Attribute) -> &CapabilityRequirement {
        let index = match attribute {
            Attribute::CurrentTime => 0,
            Attribute::Integer => 1,
            Attribute::Temperature => 2,
            Attribute::ButtonClicks => 3,
        };
        &self.requirements[index]
    }

    fn service_name(&self, uuid: Uuid) -> &'static str {
        if uuid == self.time_service {
            "current time service"
        } else {
            "SYM service"
        }
    }

    /// Match a discovery result against the catalog.
    ///
    /// Only characteristics whose declared properties cover the required
    /// operations count. Any unmet requirement yields `UnsupportedDevice`
    /// listing everything that is missing.
    pub fn validate(
        &self,
        services: &[DiscoveredService],
    ) -> Result<MatchedCharacteristics, BleError> {
        let mut matched = MatchedCharacteristics::default();
        let mut seen_services = Vec::new();

        for service in services {
            if !self.services().contains(&service.uuid) {
                debug!("Ignoring unrelated service {}", service.uuid);
                continue;
            }
            seen_services.push(service.uuid);

            for requirement in self
                .requirements
                .iter()
                .filter(|requirement| requirement.service == service.uuid)
            {
                let slot = matched.slot_mut(requirement.attribute);
                if slot.is_some() {
                    continue;
                }
                for characteristic in service
                    .characteristics
                    .iter()
                    .filter(|c| c.uuid == requirement.characteristic)
                {
                    if characteristic.properties.contains(requirement.operations) {
                        *slot = Some(MatchedCharacteristic {
                            handle: characteristic.handle,
                            properties: characteristic.properties,
                        });
                        debug!(
                            "Matched {} characteristic at {}",
                            requirement.attribute, characteristic.handle
                        );
                        break;
                    }
                    warn!(
                        "{} characteristic declares {} but {} is required",
                        requirement.attribute, characteristic.properties, requirement.operations
                    );
                }
            }
        }

        let mut missing: Vec<String> = self
            .services()
            .into_iter()
            .filter(|uuid| !seen_services.contains(uuid))
            .map(|uuid| self.service_name(uuid).to_string())
            .collect();
        missing.extend(
            self.requirements
                .iter()
                .filter(|requirement| matched.get(requirement.attribute).is_none())
                .map(|requirement| {
                    format!(
                        "{} characteristic ({})",
                        requirement.attribute, requirement.operations
                    )
                }),
        );

        if !missing.is_empty() {
            warn!("Device validation failed, missing: {}", missing.join(", "));
            return Err(BleError::UnsupportedDevice { missing });
        }

        info!("All required services and characteristics found");
        Ok(matched)
    }
}
