//! DNS query type condition.

use std::fmt;
use std::str::FromStr;

use vane_config::QueryTypeValue;
use vane_core::{ConnContext, RecordType};

use crate::error::RuleError;
use crate::item::{RuleItem, write_values};

/// The `query_type` condition group. Accepts record type mnemonics ("A",
/// "HTTPS") and raw numeric values; numbers outside the registered set are
/// kept as-is so rules can target unknown types.
#[derive(Debug)]
pub struct QueryTypeItem {
    types: Vec<RecordType>,
}

impl QueryTypeItem {
    pub fn new(values: &[QueryTypeValue]) -> Result<Self, RuleError> {
        let mut types = Vec::with_capacity(values.len());
        for value in values {
            let record_type = match value {
                QueryTypeValue::Number(number) => RecordType::from(*number),
                QueryTypeValue::Name(name) => {
                    RecordType::from_str(name).map_err(|_| RuleError::InvalidCondition {
                        field: "query_type",
                        message: format!("unknown DNS query type: {name}"),
                    })?
                }
            };
            types.push(record_type);
        }
        Ok(Self { types })
    }
}

impl RuleItem for QueryTypeItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.query_type
            .is_some_and(|query_type| self.types.contains(&query_type))
    }
}

impl fmt::Display for QueryTypeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "query_type", &self.types)
    }
}
