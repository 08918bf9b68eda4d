//! In-memory device collaborators.
//!
//! [`MemoryDirectory`] and [`MemoryDevice`] implement the
//! [`DeviceDirectory`] and [`Device`] traits with plain vectors, and record
//! every call so tests can assert on what the engine reported.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use insteon_core::address::Address;
use insteon_core::device::{
    Capability, Device, DeviceConfig, DeviceDescriptor, DeviceDirectory, StateDelta,
};
use insteon_core::error::Result;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A device whose state lives in memory.
#[derive(Debug)]
pub struct MemoryDevice {
    name: String,
    address: Address,
    capabilities: Vec<Capability>,
    on: Mutex<Option<bool>>,
    config: Mutex<DeviceConfig>,
    states: Mutex<Vec<(StateDelta, String)>>,
    log: Mutex<Vec<String>>,
    saves: Mutex<usize>,
}

impl MemoryDevice {
    pub fn new(name: &str, address: Address, capabilities: &[Capability]) -> Self {
        MemoryDevice {
            name: name.to_string(),
            address,
            capabilities: capabilities.to_vec(),
            on: Mutex::new(None),
            config: Mutex::new(DeviceConfig {
                address: Some(address),
                ..Default::default()
            }),
            states: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            saves: Mutex::new(0),
        }
    }

    /// Preset the known on/off state.
    pub fn with_on(self, on: bool) -> Self {
        *lock(&self.on) = Some(on);
        self
    }

    pub fn with_config(self, config: DeviceConfig) -> Self {
        *lock(&self.config) = config;
        self
    }

    /// Every `set_state` call received, in order.
    pub fn states(&self) -> Vec<(StateDelta, String)> {
        lock(&self.states).clone()
    }

    /// Every `log_entry` call received, in order.
    pub fn log_entries(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// How many times the configuration was persisted.
    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

#[async_trait]
impl Device for MemoryDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn address(&self) -> Address {
        self.address
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    fn is_on(&self) -> Option<bool> {
        *lock(&self.on)
    }

    fn config(&self) -> DeviceConfig {
        lock(&self.config).clone()
    }

    async fn set_state(&self, delta: StateDelta, description: &str) -> Result<()> {
        if let Some(on) = delta.on {
            *lock(&self.on) = Some(on);
        }
        lock(&self.states).push((delta, description.to_string()));
        Ok(())
    }

    async fn log_entry(&self, description: &str) -> Result<()> {
        lock(&self.log).push(description.to_string());
        Ok(())
    }

    async fn save_config(&self, config: DeviceConfig) -> Result<()> {
        *lock(&self.config) = config;
        *lock(&self.saves) += 1;
        Ok(())
    }
}

/// A device directory backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    devices: Mutex<Vec<Arc<MemoryDevice>>>,
    created: Mutex<Vec<DeviceDescriptor>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return a handle to it for later assertions.
    pub fn add(&self, device: MemoryDevice) -> Arc<MemoryDevice> {
        let device = Arc::new(device);
        lock(&self.devices).push(Arc::clone(&device));
        device
    }

    /// Every descriptor passed to `create`, in order.
    pub fn created(&self) -> Vec<DeviceDescriptor> {
        lock(&self.created).clone()
    }

    pub fn find(&self, address: &Address) -> Option<Arc<MemoryDevice>> {
        lock(&self.devices)
            .iter()
            .find(|d| d.address == *address)
            .cloned()
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn get_by_address(&self, address: &Address) -> Option<Arc<dyn Device>> {
        self.find(address).map(|d| d as Arc<dyn Device>)
    }

    async fn create(&self, descriptor: DeviceDescriptor) -> Result<()> {
        let device = MemoryDevice::new(
            &descriptor.name,
            descriptor.address,
            &descriptor.capabilities,
        )
        .with_config(descriptor.config.clone());
        lock(&self.devices).push(Arc::new(device));
        lock(&self.created).push(descriptor);
        Ok(())
    }

    async fn all(&self) -> Vec<Arc<dyn Device>> {
        lock(&self.devices)
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn Device>)
            .collect()
    }
}
