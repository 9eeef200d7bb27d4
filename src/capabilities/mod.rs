//! 能力层：能力 trait 与注册表、结果信封、产物句柄、执行器与内置能力

pub mod artifacts;
pub mod builtin;
pub mod envelope;
pub mod executor;
pub mod registry;
pub mod schema;

pub use artifacts::{ArtifactHandle, ArtifactStore};
pub use builtin::{
    register_builtin, ComputeStatisticsCapability, GenerateDataCapability, GenerateReportCapability,
    RenderChartCapability,
};
pub use envelope::{
    CapabilityCall, CapabilityKind, CapabilityOutput, Diagnostic, Envelope, Status,
};
pub use executor::{artifact_of, CapabilityExecutor, ARTIFACT_ARG};
pub use registry::{Capability, CapabilityRegistry};
pub use schema::capability_call_schema_json;
