pub mod hooks;
pub mod module;
pub mod registry;

pub use hooks::{AsyncHookPoint, HookPoint};
pub use module::{Dependency, ModuleDescriptor, ModuleGraph};
pub use registry::{Registry, RegistryError};
