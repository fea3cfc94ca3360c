//! Fault scanning of emulator log lines

use std::sync::Arc;

/// Signatures that mark an unrecoverable emulator failure
pub const DEFAULT_FAULT_SIGNATURES: &[&str] = &[" BUG: ", "Kernel panic"];

/// Stateless substring matcher over a fixed signature set
#[derive(Debug, Clone)]
pub struct FaultScanner {
    signatures: Arc<[String]>,
}

impl FaultScanner {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            signatures: signatures.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_fault(&self, line: &str) -> bool {
        self.matching_signature(line).is_some()
    }

    /// The first signature contained in `line`, if any
    pub fn matching_signature(&self, line: &str) -> Option<&str> {
        self.signatures
            .iter()
            .find(|signature| line.contains(signature.as_str()))
            .map(String::as_str)
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }
}

impl Default for FaultScanner {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_SIGNATURES.iter().copied())
    }
}
