//! Error taxonomy for wrapper generation.
//!
//! ```text
//! CodegenError
//! ├── TypeLookup          - no handler after alias/transformation search
//! ├── TypeConfiguration   - handler asked for an unsupported configuration
//! ├── NotSupported        - capability deliberately unimplemented
//! └── CodeGeneration      - invariant violated while assembling code
//! ```
//!
//! [`Skip`] is not an error in the usual sense: it is the value a generation
//! function returns to tell its caller to drop one unit of work (a candidate,
//! a declaration or a whole group) and carry on with the next one.

use thiserror::Error;

/// Errors raised while resolving types or generating a wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A type string could not be resolved to a handler.
    #[error("no type handler for `{requested}` (tried: {})", .tried.join(", "))]
    TypeLookup {
        requested: String,
        tried: Vec<String>,
    },

    /// A handler is missing information it needs, or was configured in a way
    /// it cannot honour.
    #[error("type configuration error: {0}")]
    TypeConfiguration(String),

    /// The requested type/direction combination is not implemented.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Assembling the generated code failed.
    #[error("code generation error: {0}")]
    CodeGeneration(String),
}

impl CodegenError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::TypeConfiguration(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        Self::CodeGeneration(msg.into())
    }
}

/// Outcome of a handler conversion in one crossing direction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The handler has no implementation for this direction.
    #[error("conversion not implemented")]
    Unimplemented,

    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Why a unit of work was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Failed(#[from] CodegenError),

    /// Every candidate of an overload group was dropped.
    #[error("no candidate signature could be generated")]
    NoCandidates,

    /// A candidate's calling convention disagrees with the group's.
    #[error("method flags {found} differ from {expected}")]
    FlagMismatch { expected: String, found: String },

    /// The declaration is deliberately not wrapped (e.g. private members).
    #[error("{0}")]
    NotWrapped(String),
}

/// Control signal: drop the named unit of work and continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("skipping `{name}`: {reason}")]
pub struct Skip {
    pub name: String,
    pub reason: SkipReason,
}

impl Skip {
    pub fn new(name: impl Into<String>, reason: impl Into<SkipReason>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
