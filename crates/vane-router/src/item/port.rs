//! Port conditions.

use std::fmt;
use std::ops::RangeInclusive;

use vane_core::ConnContext;

use crate::error::RuleError;
use crate::item::{RuleItem, write_values};

/// The `port`/`source_port` condition groups.
pub struct PortItem {
    is_source: bool,
    ports: Vec<u16>,
}

impl PortItem {
    pub fn new(ports: &[u16], is_source: bool) -> Self {
        Self {
            is_source,
            ports: ports.to_vec(),
        }
    }
}

impl RuleItem for PortItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let port = if self.is_source {
            ctx.source_port
        } else {
            ctx.destination_port
        };
        self.ports.contains(&port)
    }
}

impl fmt::Display for PortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.is_source { "source_port" } else { "port" };
        write_values(f, key, &self.ports)
    }
}

/// The `port_range`/`source_port_range` condition groups. Ranges are written
/// `start:end` with either bound optional, so `:1023` covers the well-known
/// ports and `49152:` the ephemeral ones.
#[derive(Debug)]
pub struct PortRangeItem {
    is_source: bool,
    ranges: Vec<RangeInclusive<u16>>,
    raw: Vec<String>,
}

impl PortRangeItem {
    pub fn new(raw: &[String], is_source: bool) -> Result<Self, RuleError> {
        let field = if is_source {
            "source_port_range"
        } else {
            "port_range"
        };
        let mut ranges = Vec::with_capacity(raw.len());
        for value in raw {
            ranges.push(parse_port_range(value).map_err(|message| {
                RuleError::InvalidCondition { field, message }
            })?);
        }
        Ok(Self {
            is_source,
            ranges,
            raw: raw.to_vec(),
        })
    }
}

fn parse_port_range(raw: &str) -> Result<RangeInclusive<u16>, String> {
    let invalid = || format!("invalid port range: {raw}");
    let Some((start, end)) = raw.split_once(':') else {
        return Err(invalid());
    };
    let start: u16 = if start.is_empty() {
        0
    } else {
        start.parse().map_err(|_| invalid())?
    };
    let end: u16 = if end.is_empty() {
        u16::MAX
    } else {
        end.parse().map_err(|_| invalid())?
    };
    if start > end {
        return Err(invalid());
    }
    Ok(start..=end)
}

impl RuleItem for PortRangeItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        let port = if self.is_source {
            ctx.source_port
        } else {
            ctx.destination_port
        };
        self.ranges.iter().any(|range| range.contains(&port))
    }
}

impl fmt::Display for PortRangeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.is_source {
            "source_port_range"
        } else {
            "port_range"
        };
        write_values(f, key, &self.raw)
    }
}
