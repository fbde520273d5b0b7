//! # Module Devices - modèle de device UPnP
//!
//! Représentation en mémoire d'un arbre de devices : le device racine,
//! ses sous-devices embarqués et leurs services. L'arbre est possédé de
//! haut en bas (aucun pointeur vers le parent), les parcours descendent
//! par les listes possédées.

pub mod description;

use thiserror::Error;

use crate::services::{Service, ServiceError};
use crate::types::{DiscoveryType, ResourceType, Udn};

/// Erreurs de construction/validation d'un arbre de devices.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("duplicate UDN in device tree: {0}")]
    DuplicateUdn(Udn),

    #[error("duplicate service id '{0}' in device {1}")]
    DuplicateServiceId(String, Udn),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<ModelError> for crate::errors::UpnpError {
    fn from(err: ModelError) -> Self {
        crate::errors::UpnpError::MalformedMessage(err.to_string())
    }
}

/// Un device UPnP : identité, métadonnées, services et sous-devices.
#[derive(Debug, Clone)]
pub struct Device {
    udn: Udn,
    device_type: ResourceType,
    friendly_name: String,
    manufacturer: String,
    manufacturer_url: Option<String>,
    model_name: String,
    model_description: Option<String>,
    model_number: Option<String>,
    serial_number: Option<String>,
    presentation_url: Option<String>,
    config_id: u32,
    services: Vec<Service>,
    devices: Vec<Device>,
}

impl Device {
    pub fn new(udn: Udn, device_type: ResourceType, friendly_name: impl Into<String>) -> Self {
        let friendly_name = friendly_name.into();
        Self {
            udn,
            device_type,
            model_name: friendly_name.clone(),
            friendly_name,
            manufacturer: "DomoCore".to_string(),
            manufacturer_url: None,
            model_description: None,
            model_number: None,
            serial_number: None,
            presentation_url: None,
            config_id: 1,
            services: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn udn(&self) -> &Udn {
        &self.udn
    }

    pub fn device_type(&self) -> &ResourceType {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn set_manufacturer(&mut self, manufacturer: impl Into<String>) {
        self.manufacturer = manufacturer.into();
    }

    pub fn manufacturer_url(&self) -> Option<&str> {
        self.manufacturer_url.as_deref()
    }

    pub fn set_manufacturer_url(&mut self, url: impl Into<String>) {
        self.manufacturer_url = Some(url.into());
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn set_model_name(&mut self, name: impl Into<String>) {
        self.model_name = name.into();
    }

    pub fn model_description(&self) -> Option<&str> {
        self.model_description.as_deref()
    }

    pub fn set_model_description(&mut self, description: impl Into<String>) {
        self.model_description = Some(description.into());
    }

    pub fn model_number(&self) -> Option<&str> {
        self.model_number.as_deref()
    }

    pub fn set_model_number(&mut self, number: impl Into<String>) {
        self.model_number = Some(number.into());
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn set_serial_number(&mut self, serial: impl Into<String>) {
        self.serial_number = Some(serial.into());
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    pub fn set_presentation_url(&mut self, url: impl Into<String>) {
        self.presentation_url = Some(url.into());
    }

    pub fn config_id(&self) -> u32 {
        self.config_id
    }

    pub fn set_config_id(&mut self, config_id: u32) {
        self.config_id = config_id;
    }

    pub fn add_service(&mut self, service: Service) -> Result<(), ModelError> {
        if self
            .services
            .iter()
            .any(|s| s.service_id() == service.service_id())
        {
            return Err(ModelError::DuplicateServiceId(
                service.service_id().to_string(),
                self.udn.clone(),
            ));
        }
        self.services.push(service);
        Ok(())
    }

    pub fn add_embedded(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut [Service] {
        &mut self.services
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_id() == service_id)
    }

    pub fn embedded(&self) -> &[Device] {
        &self.devices
    }

    pub fn embedded_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    /// Parcours en profondeur : ce device puis tous ses descendants.
    pub fn iter_tree(&self) -> Vec<&Device> {
        let mut out = vec![self];
        let mut index = 0;
        while index < out.len() {
            let current = out[index];
            out.extend(current.devices.iter());
            index += 1;
        }
        out
    }

    /// Assigne les routes servies par le host à chaque service de
    /// l'arbre : `/device/<udn>/<service>/…`.
    pub fn assign_host_routes(&mut self) {
        let udn = self.udn.simple();
        for service in self.services.iter_mut() {
            let short = service.short_id().to_string();
            let base = format!("/device/{udn}/{short}");
            service.set_urls(
                format!("{base}/scpd.xml"),
                format!("{base}/control"),
                format!("{base}/event"),
            );
        }
        for child in self.devices.iter_mut() {
            child.assign_host_routes();
        }
    }

    /// Route de la description du device racine.
    pub fn description_path(&self) -> String {
        format!("/device/{}/desc.xml", self.udn.simple())
    }

    /// Recherche un device (racine ou embarqué) par UDN.
    pub fn find_device(&self, udn: &Udn) -> Option<&Device> {
        self.iter_tree().into_iter().find(|d| d.udn() == udn)
    }

    /// Valide l'arbre complet : unicité des UDN, unicité des identifiants
    /// de service par device, résolution des variables liées.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = std::collections::HashSet::new();
        for device in self.iter_tree() {
            if !seen.insert(device.udn().clone()) {
                return Err(ModelError::DuplicateUdn(device.udn().clone()));
            }
            for service in device.services() {
                service.validate()?;
            }
        }
        Ok(())
    }

    /// Ensemble des USNs à annoncer, dans l'ordre d'UDA :
    /// rootdevice, puis un par UDN, puis un par type de device, puis un
    /// par type de service par device (types de service dédupliqués).
    pub fn usn_set(&self) -> Vec<DiscoveryType> {
        let tree = self.iter_tree();
        let mut usns = Vec::new();

        usns.push(DiscoveryType::RootDevice(Some(self.udn.clone())));
        for device in &tree {
            usns.push(DiscoveryType::SpecificDevice(device.udn().clone()));
        }
        for device in &tree {
            usns.push(DiscoveryType::DeviceType(
                Some(device.udn().clone()),
                device.device_type().clone(),
            ));
        }
        for device in &tree {
            let mut seen_types: Vec<&ResourceType> = Vec::new();
            for service in device.services() {
                if seen_types.iter().any(|t| *t == service.service_type()) {
                    continue;
                }
                seen_types.push(service.service_type());
                usns.push(DiscoveryType::ServiceType(
                    Some(device.udn().clone()),
                    service.service_type().clone(),
                ));
            }
        }
        usns
    }
}
