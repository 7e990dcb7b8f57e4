//! Outbound command frames.

use bytes::{BufMut, BytesMut};
use serde_json::{Map, Value};
use solarsis_frame::{frame_checksum, sum_checksum, Frame, CHUNK_SIZE};

use crate::error::Result;
use crate::model::{CommandDef, FamilyConfig};
use crate::value::encode_value;

/// Command parameters keyed by variable name.
pub type Params = Map<String, Value>;

/// A fully assembled command, ready to queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltFrame {
    /// Canonical `family/command` path.
    pub path: String,
    /// Config block the frame was built with; replies parse with the same one.
    pub config: String,
    /// Encoded parameter string, without markers or checksums.
    pub parameters: String,
    /// Default post-receive callback of the command.
    pub callback: Option<String>,
    pub frame: Frame,
}

impl BuiltFrame {
    /// Frame split into device-sized bursts.
    pub fn chunks(&self) -> Vec<bytes::Bytes> {
        self.frame.chunks(CHUNK_SIZE)
    }
}

/// Encode the parameters a command declares, in declaration order.
///
/// Parameters that are missing, `null`, `""` or `false` are skipped. Encoded
/// values are joined with the config separator.
pub fn encode_parameters(command: &CommandDef, config: &FamilyConfig, params: &Params) -> Result<String> {
    let mut encoded = Vec::with_capacity(command.variables.len());
    for (name, rule) in &command.variables {
        let Some(value) = params.get(name) else {
            continue;
        };
        if is_blank(value) {
            continue;
        }
        encoded.push(encode_value(name, value, rule, &config.pad)?);
    }
    Ok(encoded.join(&config.separator))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Assemble `start + code + parameters [+ sum] [+ crc] + terminator`.
///
/// Both checksums cover `start + code + parameters`.
pub fn build_frame(command: &CommandDef, config: &FamilyConfig, params: Option<&Params>) -> Result<BuiltFrame> {
    let parameters = match params {
        Some(params) => encode_parameters(command, config, params)?,
        None => String::new(),
    };

    let mut body = BytesMut::with_capacity(
        config.start_marker.len() + command.code.len() + parameters.len() + 8,
    );
    body.put_slice(config.start_marker.as_bytes());
    body.put_slice(command.code.as_bytes());
    body.put_slice(parameters.as_bytes());

    let mut frame = body.clone();
    if command.sum_checksum {
        frame.put_slice(sum_checksum(&body).as_bytes());
    }
    if command.checksum_enabled(config) {
        frame.put_slice(&frame_checksum(&body));
    }
    frame.put_slice(config.terminator.as_bytes());

    let frame = Frame::new(frame.freeze());
    tracing::trace!(
        command = %command.path(),
        config = %config.name,
        frame = %frame.escaped(),
        "built command frame"
    );

    Ok(BuiltFrame {
        path: command.path(),
        config: config.name.clone(),
        parameters,
        callback: command.callback.clone(),
        frame,
    })
}
