mod errors;
pub use errors::RegistryError;

mod registry;
pub use registry::{ServiceQuery, ServiceRegistry, WatchResult, discover};

mod selector;
pub use selector::{First, RoundRobin, Selector};

mod consul;
pub use consul::ConsulRegistry;

mod memory;
pub use memory::MemoryRegistry;

mod driver;
pub use driver::{RegistryDriver, new_registry};
