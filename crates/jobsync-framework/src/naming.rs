//! Workload-name encoding
//!
//! Platform job names look like `<user>~<job>` and are not valid Kubernetes
//! object names. Two schemes are in use across cluster backends, so the
//! scheme is a pluggable [`NameEncoder`].

use std::collections::BTreeMap;

use crate::snapshot::JOB_NAME_ANNOTATION;

/// Maps a platform job name to a DNS-safe workload object name
pub trait NameEncoder: Send + Sync {
    /// Encode a platform job name
    fn encode(&self, name: &str) -> String;
}

/// Lower-cases and keeps only `[a-z0-9]`, dropping a leading `unknown`
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainNameEncoder;

impl NameEncoder for PlainNameEncoder {
    fn encode(&self, name: &str) -> String {
        name.strip_prefix("unknown")
            .unwrap_or(name)
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .collect()
    }
}

/// md5 hex digest for platform-generated names (`user~job`)
///
/// Names without a `~`, or prefixed with `unknown`, were not generated by
/// the platform and fall back to [`PlainNameEncoder`].
#[derive(Clone, Copy, Debug, Default)]
pub struct HashedNameEncoder;

impl NameEncoder for HashedNameEncoder {
    fn encode(&self, name: &str) -> String {
        if name.starts_with("unknown") || !name.contains('~') {
            PlainNameEncoder.encode(name)
        } else {
            format!("{:x}", md5::compute(name.as_bytes()))
        }
    }
}

/// Recover the platform job name for a workload object
///
/// The `jobName` annotation wins; objects that predate it were never
/// encoded, so their object name is returned as-is.
pub fn decode_name<'a>(
    object_name: &'a str,
    annotations: Option<&'a BTreeMap<String, String>>,
) -> &'a str {
    annotations
        .and_then(|a| a.get(JOB_NAME_ANNOTATION))
        .map(String::as_str)
        .unwrap_or(object_name)
}
