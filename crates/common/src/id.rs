//! ID generation utilities.

use ulid::Ulid;

/// ID generator for campaigns, messages and queue jobs.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new lowercase ULID.
    ///
    /// ULIDs sort by creation time, which keeps message rows of a campaign
    /// roughly in dispatch order.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate an ID with a short type prefix, e.g. `job_01h...`.
    #[must_use]
    pub fn generate_prefixed(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.generate())
    }
}
