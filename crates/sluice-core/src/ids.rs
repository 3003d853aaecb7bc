//! Identifier validation shared by every entry point.

use crate::error::GatewayError;
use regex::Regex;
use std::sync::OnceLock;

pub const MAX_ID_LEN: usize = 128;

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@/-]*$").expect("id regex must compile"))
}

/// Check one identifier. `kind` names it in the error (`pipe id`, `run id`, ...).
///
/// `:` is excluded so `{run_id}:{pipe_id}` composite keys stay unambiguous.
pub fn validate_id(kind: &str, value: &str) -> Result<(), GatewayError> {
    if value.is_empty() {
        return Err(GatewayError::invalid(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(GatewayError::invalid(format!(
            "{kind} exceeds {MAX_ID_LEN} characters: {value}"
        )));
    }
    if !id_re().is_match(value) {
        return Err(GatewayError::invalid(format!(
            "{kind} contains unsupported characters: {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for id in ["sf-crm-001", "run_2024.10.01", "tenant@acme/prod", "A"] {
            validate_id("pipe id", id).unwrap_or_else(|e| panic!("{id} should be valid: {e}"));
        }
    }

    #[test]
    fn rejects_empty_colon_and_overlong() {
        assert!(validate_id("run id", "").is_err());
        assert!(validate_id("run id", "r1:p1").is_err());
        assert!(validate_id("run id", "-leading").is_err());
        let long = "a".repeat(MAX_ID_LEN + 1);
        let err = validate_id("run id", &long).expect_err("overlong id must fail");
        assert!(err.to_string().contains("exceeds"));
    }
}
