//! Boundary request types with field-level validation

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{Capability, Requirement};

/// Maximum alias length in characters
pub const MAX_ALIAS_LEN: usize = 64;

/// Maximum number of declared capabilities
pub const MAX_CAPABILITIES: usize = 50;

/// Default page size
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Aliases are letters, digits, spaces, underscores and hyphens
pub fn validate_alias(alias: &str) -> Result<(), ValidationError> {
    if alias.is_empty() || alias.chars().count() > MAX_ALIAS_LEN {
        return Err(ValidationError::new("alias_length"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ');
    if !alias.chars().all(allowed) {
        return Err(ValidationError::new("alias_charset"));
    }
    Ok(())
}

fn check_alias(alias: Option<&str>, errors: &mut ValidationErrors) {
    if let Some(alias) = alias {
        if let Err(e) = validate_alias(alias) {
            errors.add("alias", e);
        }
    }
}

/// Merge derive-level errors with the alias charset check
fn validate_with_alias<T: Validate>(value: &T, alias: Option<&str>) -> Result<(), ValidationErrors> {
    let mut errors = match value.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(e) => e,
    };
    check_alias(alias, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Register a new agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    pub alias: Option<String>,
    #[serde(default)]
    #[validate(length(max = 50), nested)]
    pub capabilities: Vec<Capability>,
}

impl RegisterRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        validate_with_alias(self, self.alias.as_deref())
    }
}

/// Update the caller's own profile; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    pub alias: Option<String>,
    #[validate(length(max = 50), nested)]
    pub capabilities: Option<Vec<Capability>>,
}

impl UpdateProfileRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        validate_with_alias(self, self.alias.as_deref())
    }
}

/// Publish a task
///
/// Bounty bounds are enforced by the engine so that an undersized bounty
/// reports `BOUNTY_TOO_LOW` rather than a generic validation failure.
///
/// Unknown fields are rejected so that misnamed input is never dropped.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PublishTaskRequest {
    pub bounty: u64,
    #[serde(default)]
    #[validate(length(max = 50), nested)]
    pub requirements: Vec<Requirement>,
    #[serde(default = "empty_object", alias = "payload_prompt")]
    pub payload: serde_json::Value,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

impl PublishTaskRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        self.validate()
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Submit a work product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(default = "empty_object", alias = "payload_result")]
    pub result: serde_json::Value,
}

/// Publisher's decision on a submitted result
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleTaskRequest {
    #[serde(alias = "accepted")]
    pub accept: bool,
}

/// Pagination query parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}
