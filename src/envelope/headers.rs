//! Record headers: tenant identity and span-trace metadata.

use std::collections::HashMap;

use uuid::Uuid;

use super::{EnvelopeError, Result};
use crate::tenant::Tenant;

pub const TENANT_ID: &str = "tenant_id";
pub const REGION: &str = "region";
pub const MAJOR_VERSION: &str = "major_version";
pub const MINOR_VERSION: &str = "minor_version";
pub const TRACE_ID: &str = "trace_id";
pub const SPAN_ID: &str = "span_id";
pub const PARENT_SPAN_ID: &str = "parent_span_id";

/// Span-trace metadata, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Start a new trace.
    pub fn root() -> Self {
        Self {
            trace_id: hex::encode(rand::random::<[u8; 16]>()),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// A child span within the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }

    pub(crate) fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (TRACE_ID, self.trace_id.clone()),
            (SPAN_ID, self.span_id.clone()),
        ];
        if let Some(parent) = &self.parent_span_id {
            out.push((PARENT_SPAN_ID, parent.clone()));
        }
        out
    }

    /// Lift trace headers; a record without a trace starts a fresh one.
    pub(crate) fn from_headers(headers: &HashMap<String, String>) -> Self {
        match (headers.get(TRACE_ID), headers.get(SPAN_ID)) {
            (Some(trace), Some(span)) => Self {
                trace_id: trace.clone(),
                span_id: span.clone(),
                parent_span_id: headers.get(PARENT_SPAN_ID).cloned(),
            },
            _ => Self::root(),
        }
    }
}

fn new_span_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

pub(crate) fn tenant_headers(tenant: &Tenant) -> Vec<(&'static str, String)> {
    vec![
        (TENANT_ID, tenant.id.to_string()),
        (REGION, tenant.region.clone()),
        (MAJOR_VERSION, tenant.major_version.to_string()),
        (MINOR_VERSION, tenant.minor_version.to_string()),
    ]
}

/// Collect raw header pairs; non-UTF-8 values are skipped.
pub(crate) fn collect<'a, K, I>(pairs: I) -> HashMap<String, String>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, &'a [u8])>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| {
            std::str::from_utf8(v)
                .ok()
                .map(|v| (k.as_ref().to_string(), v.to_string()))
        })
        .collect()
}

pub(crate) fn parse_tenant(headers: &HashMap<String, String>) -> Result<Tenant> {
    let raw_id = headers
        .get(TENANT_ID)
        .ok_or(EnvelopeError::MissingHeader(TENANT_ID))?;
    let id = Uuid::parse_str(raw_id).map_err(|_| EnvelopeError::InvalidHeader {
        name: TENANT_ID,
        value: raw_id.clone(),
    })?;
    let region = headers.get(REGION).cloned().unwrap_or_default();
    let major_version = parse_version(headers, MAJOR_VERSION)?;
    let minor_version = parse_version(headers, MINOR_VERSION)?;
    Ok(Tenant::new(id, region, major_version, minor_version))
}

fn parse_version(headers: &HashMap<String, String>, name: &'static str) -> Result<u16> {
    match headers.get(name) {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| EnvelopeError::InvalidHeader {
            name,
            value: raw.clone(),
        }),
    }
}
