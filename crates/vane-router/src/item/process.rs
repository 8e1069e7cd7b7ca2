//! Process metadata conditions. All of these match against the optional
//! [`ProcessInfo`] attached to the request and are false when it is absent.
//!
//! [`ProcessInfo`]: vane_core::ProcessInfo

use std::fmt;

use regex::Regex;
use vane_core::ConnContext;

use crate::error::RuleError;
use crate::item::{RuleItem, write_values};

/// The `process_name` condition group.
pub struct ProcessNameItem {
    names: Vec<String>,
}

impl ProcessNameItem {
    pub fn new(names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
        }
    }
}

impl RuleItem for ProcessNameItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.name.as_deref())
            .is_some_and(|name| self.names.iter().any(|n| n == name))
    }
}

impl fmt::Display for ProcessNameItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "process_name", &self.names)
    }
}

/// The `process_path` condition group.
pub struct ProcessPathItem {
    paths: Vec<String>,
}

impl ProcessPathItem {
    pub fn new(paths: &[String]) -> Self {
        Self {
            paths: paths.to_vec(),
        }
    }
}

impl RuleItem for ProcessPathItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.path.as_deref())
            .is_some_and(|path| self.paths.iter().any(|p| p == path))
    }
}

impl fmt::Display for ProcessPathItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "process_path", &self.paths)
    }
}

/// The `process_path_regex` condition group.
#[derive(Debug)]
pub struct ProcessPathRegexItem {
    regexes: Vec<Regex>,
}

impl ProcessPathRegexItem {
    pub fn new(patterns: &[String]) -> Result<Self, RuleError> {
        let mut regexes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            regexes.push(Regex::new(pattern).map_err(|err| RuleError::InvalidCondition {
                field: "process_path_regex",
                message: err.to_string(),
            })?);
        }
        Ok(Self { regexes })
    }
}

impl RuleItem for ProcessPathRegexItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.path.as_deref())
            .is_some_and(|path| self.regexes.iter().any(|r| r.is_match(path)))
    }
}

impl fmt::Display for ProcessPathRegexItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "process_path_regex", &self.regexes)
    }
}

/// The `package_name` condition group.
pub struct PackageNameItem {
    packages: Vec<String>,
}

impl PackageNameItem {
    pub fn new(packages: &[String]) -> Self {
        Self {
            packages: packages.to_vec(),
        }
    }
}

impl RuleItem for PackageNameItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.package_name.as_deref())
            .is_some_and(|package| self.packages.iter().any(|p| p == package))
    }
}

impl fmt::Display for PackageNameItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "package_name", &self.packages)
    }
}

/// The `user` condition group.
pub struct UserItem {
    users: Vec<String>,
}

impl UserItem {
    pub fn new(users: &[String]) -> Self {
        Self {
            users: users.to_vec(),
        }
    }
}

impl RuleItem for UserItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.user.as_deref())
            .is_some_and(|user| self.users.iter().any(|u| u == user))
    }
}

impl fmt::Display for UserItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "user", &self.users)
    }
}

/// The `user_id` condition group.
pub struct UserIdItem {
    ids: Vec<u32>,
}

impl UserIdItem {
    pub fn new(ids: &[u32]) -> Self {
        Self { ids: ids.to_vec() }
    }
}

impl RuleItem for UserIdItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.process
            .as_ref()
            .and_then(|process| process.user_id)
            .is_some_and(|id| self.ids.contains(&id))
    }
}

impl fmt::Display for UserIdItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "user_id", &self.ids)
    }
}
