use std::env;

/// What a statement does when CONFLICT_CHECK finds a row owned by another
/// transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail immediately with a retriable conflict error.
    NoWait,
    /// Wait for the contested row lock, then re-run the statement.
    Wait,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on cascade frames stacked along one descent.
    pub max_cascade_depth: usize,
    pub conflict_policy: ConflictPolicy,
    pub max_conflict_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 1024,
            conflict_policy: ConflictPolicy::NoWait,
            max_conflict_retries: 8,
        }
    }
}

impl EngineConfig {
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: usize) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Defaults overridden by `REFCASCADE_MAX_DEPTH`,
    /// `REFCASCADE_CONFLICT_POLICY` (`wait` or `nowait`) and
    /// `REFCASCADE_MAX_RETRIES`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup("REFCASCADE_MAX_DEPTH") {
            config.max_cascade_depth = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid REFCASCADE_MAX_DEPTH {raw:?}: {e}"))?;
            if config.max_cascade_depth == 0 {
                anyhow::bail!("REFCASCADE_MAX_DEPTH must be at least 1");
            }
        }
        if let Some(raw) = lookup("REFCASCADE_CONFLICT_POLICY") {
            config.conflict_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "wait" => ConflictPolicy::Wait,
                "nowait" | "no_wait" => ConflictPolicy::NoWait,
                other => anyhow::bail!("invalid REFCASCADE_CONFLICT_POLICY {other:?}"),
            };
        }
        if let Some(raw) = lookup("REFCASCADE_MAX_RETRIES") {
            config.max_conflict_retries = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid REFCASCADE_MAX_RETRIES {raw:?}: {e}"))?;
        }
        Ok(config)
    }
}
