//! Admission gate: content requires prior structure.
//!
//! A stateless predicate over the pipe definition store. With no definitions
//! registered at all the gate is bypassed (bootstrap); otherwise the pipe id
//! must be declared.

use crate::pipes::PipeDefinitionStore;
use crate::records::PipeDefinition;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Why a content push was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("pipe '{pipe_id}' has no structure declaration; available pipes: [{}]", .available_pipes.join(", "))]
pub struct AdmissionRefusal {
    pub pipe_id: String,
    /// Known pipe ids at refusal time, in declaration order.
    pub available_pipes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The pipe has a structure declaration.
    Matched(PipeDefinition),
    /// No structure registered anywhere; the push is let through unchecked.
    Bootstrap,
}

impl Admission {
    pub fn matched_schema(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Declared fields, empty under bootstrap.
    pub fn schema_fields(&self) -> Vec<String> {
        match self {
            Self::Matched(definition) => definition.fields.clone(),
            Self::Bootstrap => Vec::new(),
        }
    }
}

pub fn admit(pipes: &PipeDefinitionStore, pipe_id: &str) -> Result<Admission, AdmissionRefusal> {
    if let Some(definition) = pipes.lookup(pipe_id) {
        debug!(pipe_id, "content admitted");
        return Ok(Admission::Matched(definition));
    }

    let available_pipes = pipes.declared_ids();
    if available_pipes.is_empty() {
        warn!(pipe_id, "no pipe definitions registered; admission guard bypassed");
        return Ok(Admission::Bootstrap);
    }

    warn!(pipe_id, known = available_pipes.len(), "content refused: undeclared pipe");
    Err(AdmissionRefusal {
        pipe_id: pipe_id.to_string(),
        available_pipes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use sluice_cache::CacheHandle;

    fn store() -> PipeDefinitionStore {
        PipeDefinitionStore::open(&GatewayConfig::default(), CacheHandle::detached())
    }

    #[test]
    fn empty_store_bypasses_the_gate() {
        let admission = admit(&store(), "anything").expect("bootstrap admits");
        assert_eq!(admission, Admission::Bootstrap);
        assert!(!admission.matched_schema());
        assert!(admission.schema_fields().is_empty());
    }

    #[test]
    fn declared_pipe_is_matched() {
        let pipes = store();
        pipes
            .register(PipeDefinition::new("p1", vec!["a".into(), "b".into()]))
            .expect("register");

        let admission = admit(&pipes, "p1").expect("declared pipe admits");
        assert!(admission.matched_schema());
        assert_eq!(admission.schema_fields(), vec!["a", "b"]);
    }

    #[test]
    fn undeclared_pipe_is_refused_with_known_ids() {
        let pipes = store();
        pipes.register(PipeDefinition::new("zeta", vec![])).expect("register");
        pipes.register(PipeDefinition::new("alpha", vec![])).expect("register");

        let refusal = admit(&pipes, "ghost").expect_err("must refuse");
        assert_eq!(refusal.pipe_id, "ghost");
        assert_eq!(refusal.available_pipes, vec!["zeta", "alpha"]);
        assert_eq!(
            refusal.to_string(),
            "pipe 'ghost' has no structure declaration; available pipes: [zeta, alpha]"
        );
    }
}
