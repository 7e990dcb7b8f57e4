//! Declarative inverter protocol description.
//!
//! A protocol document groups commands into families; every family shares one
//! `<family>_config` block describing markers, separators and checksums. The
//! document is validated and converted once into a typed tree
//! ([`ProtocolSchema`]); everything downstream works on that tree:
//!
//! - [`value`] encodes command parameters and decodes reply fields
//! - [`builder`] assembles outbound frames
//! - [`response`] strips, splits and merges replies into structured results

pub mod builder;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod response;
pub mod validator;
pub mod value;

#[cfg(test)]
pub(crate) mod fixtures;

pub use builder::{build_frame, encode_parameters, BuiltFrame, Params};
pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use model::{
    BackRef, CommandDef, Family, FamilyConfig, FieldRule, NumericRule, ResponseFormat,
    ResponseTemplate, TemplateNode, VariableRule,
};
pub use registry::{normalize_path, ProtocolSchema};
pub use response::{clean_response, metric_string, parse_response, split_fields, ParsedResponse};
pub use value::{decode_field, encode_value, format_number, number_value, value_text};
