/// Result alias that carries the custom [`PaletteError`] type.
pub type Result<T> = std::result::Result<T, PaletteError>;

/// Common error type for the core crate.
///
/// Most kinds are recovered where they are detected and only show up in run
/// diagnostics. [`PaletteError::PipelineSuperseded`] is the one kind handed
/// back to a caller whose run was cancelled by a newer extraction event.
#[derive(Debug, thiserror::Error)]
pub enum PaletteError {
    /// A color string could not be parsed; a neutral color was substituted.
    #[error("invalid color input `{input}` for `{role}`")]
    InvalidColorInput { role: String, input: String },
    /// Chroma reduction could not bring a color into gamut within the step cap.
    #[error("gamut reduction exhausted after {steps} steps")]
    GamutReductionExhausted { steps: u32 },
    /// Capability probing did not answer within its bound.
    #[error("capability probe timed out after {timeout_ms} ms")]
    CapabilityProbeTimeout { timeout_ms: u64 },
    /// A flush hit its frame budget and deferred the remaining writes.
    #[error("flush exceeded budget; {deferred} writes deferred")]
    SchedulerBudgetExceeded { deferred: usize },
    /// A newer run replaced this one before it finished.
    #[error("run {generation} for `{source_id}` was superseded")]
    PipelineSuperseded { source_id: String, generation: u64 },
    /// The extraction event carried nothing to build a palette from.
    #[error("extraction for `{0}` contained no usable colors")]
    EmptyExtraction(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around configuration parse errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PaletteError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// True for kinds that are recovered locally and never abort a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidColorInput { .. }
                | Self::GamutReductionExhausted { .. }
                | Self::CapabilityProbeTimeout { .. }
                | Self::SchedulerBudgetExceeded { .. }
                | Self::PipelineSuperseded { .. }
        )
    }
}

impl From<&str> for PaletteError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PaletteError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
