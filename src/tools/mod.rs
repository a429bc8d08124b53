//! Tools exposed to the model.

pub mod descriptor;
pub mod registry;

pub use descriptor::ToolDescriptor;
pub use registry::{RegistrationReport, RegistryDiagnostic, ToolRegistry};
