use std::{str::FromStr, sync::Arc};

use waypost_model::RegistryConfig;

use crate::{
    consul::ConsulRegistry, errors::RegistryError, memory::MemoryRegistry,
    registry::ServiceRegistry,
};

/// Registry backend selected by name at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryDriver {
    Consul,
    Memory,
}

impl FromStr for RegistryDriver {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consul" => Ok(RegistryDriver::Consul),
            "memory" | "mem" => Ok(RegistryDriver::Memory),
            _ => Err(RegistryError::UnknownDriver(s.to_string())),
        }
    }
}

impl RegistryDriver {
    pub fn build(self, config: RegistryConfig) -> Result<Arc<dyn ServiceRegistry>, RegistryError> {
        match self {
            RegistryDriver::Consul => Ok(Arc::new(ConsulRegistry::new(config)?)),
            RegistryDriver::Memory => {
                config.validate()?;
                Ok(Arc::new(MemoryRegistry::new(config)))
            }
        }
    }
}

/// Registry client for `driver` (`"consul"` or `"memory"`).
pub fn new_registry(
    driver: &str,
    config: RegistryConfig,
) -> Result<Arc<dyn ServiceRegistry>, RegistryError> {
    driver.parse::<RegistryDriver>()?.build(config)
}
