//! Project identifiers arriving from the network.
//!
//! A project id is accepted only as a plain run of ASCII digits that fits in
//! an `i64`. Signs, whitespace, leading `+`, exponents and anything else are
//! rejected before any store or build step sees the value.

/// Longest raw input echoed back in errors and logs.
const MAX_ECHO_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid project id: {input:?}")]
pub struct InvalidProjectId {
    pub input: String,
}

impl InvalidProjectId {
    fn new(input: &str) -> Self {
        let input = input.chars().take(MAX_ECHO_LEN).collect();
        Self { input }
    }
}

/// Parse a project id from a path segment.
pub fn parse_project_id(raw: &str) -> Result<i64, InvalidProjectId> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidProjectId::new(raw));
    }
    raw.parse::<i64>().map_err(|_| InvalidProjectId::new(raw))
}

/// Re-check an already typed id: only non-negative values are ids.
pub fn check_project_id(id: i64) -> Result<i64, InvalidProjectId> {
    if id < 0 {
        return Err(InvalidProjectId::new(&id.to_string()));
    }
    Ok(id)
}
