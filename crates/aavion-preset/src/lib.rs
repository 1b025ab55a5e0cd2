//! Export presets: shape validation, bundled defaults, and the registry
//! stored in the system brain under `export.presets`.

mod bundled;
mod model;
mod registry;

pub use bundled::{BUNDLED_SLUGS, bundled_presets};
pub use model::{
    CachePolicy, Destination, ExportFormat, IncludeReferences, MissingPayload, Policies, Preset,
    PresetMeta, PresetOptions, PresetSelection, PresetSettings, PresetTemplates, ReferencePolicy,
    Transform, VariableDef, VariableKind, validate_preset,
};
pub use registry::{PresetRegistry, PresetWrite};
