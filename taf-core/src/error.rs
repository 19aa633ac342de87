/// Errors produced by the `taf-core` crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// An opinion tuple violated `b + d + u = 1` or left `[0, 1]`.
    #[error(
        "invalid opinion (b={belief}, d={disbelief}, u={uncertainty}, a={base_rate}): \
         components must lie in [0, 1] and belief + disbelief + uncertainty must equal 1"
    )]
    InvalidOpinion { belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64 },

    /// A quantifier weight configuration was rejected.
    #[error("invalid quantifier weights: {reason}")]
    InvalidWeights { reason: String },

    /// A template parameter could not be interpreted.
    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    /// An entity, pattern or TMI identifier could not be parsed.
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// An evidence type or detector name is not known.
    #[error("unknown evidence type '{name}'")]
    UnknownEvidence { name: String },
}
