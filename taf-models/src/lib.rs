//! Built-in trust model templates.
//!
//! Call [`register_builtin`] once at startup to make every template
//! resolvable by its `name@version` identifier.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod ewma;
pub mod ima;
pub mod mec;
pub mod params;
pub mod vcm;

use taf_core::TemplateRegistry;

pub use ima::ImaStandalone;
pub use mec::NtmStandalone;
pub use vcm::VehicleComputerMigration;

/// Registers `IMA_STANDALONE@0.0.2`, `VCM@0.0.1` and `NTM_STANDALONE@0.0.1`.
pub fn register_builtin(registry: &mut TemplateRegistry) {
    registry.register(ImaStandalone).register(VehicleComputerMigration).register(NtmStandalone);
}
