//! The error type shared by every builder operation.

use inkwell::builder::BuilderError;
use inkwell::support::LLVMString;
use thiserror::Error;

/// Errors raised while building IR.
///
/// Every operation either succeeds and mutates the module, or fails with one
/// of these and leaves the current block as it found it.
#[derive(Clone, Debug, PartialEq, Error)]
#[non_exhaustive]
pub enum Error {
    /// Operands or slots whose IR types cannot be reconciled.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// A literal whose shape does not fit the target type.
    #[error("literal does not fit {ty}: {reason}")]
    BadLiteral {
        /// The target type, printed as IR.
        ty: String,
        /// What went wrong.
        reason: String,
    },
    /// A numeric literal outside the range of the target type.
    #[error("literal {literal} is out of range for {ty}")]
    LiteralOutOfRange {
        /// The literal, as written.
        literal: String,
        /// The target type, printed as IR.
        ty: String,
    },
    /// A type that the IR cannot express, such as `float(12)` or an array of void.
    #[error("invalid type: {0}")]
    InvalidType(String),
    /// A rigid name collided with an existing symbol.
    #[error("duplicate name `{0}`")]
    DuplicateName(String),
    /// `var` found no symbol with this name.
    #[error("name `{0}` not found")]
    NameNotFound(String),
    /// The same key was given to two cases of one `switch_`.
    #[error("duplicate case {0}")]
    DuplicateCase(i128),
    /// An instruction was emitted into a block that already has a terminator.
    #[error("block `{0}` is already terminated")]
    BlockAlreadyTerminated(String),
    /// Misplaced control flow: `break_` outside a loop, a `return_` of the
    /// wrong type, or a body that falls off its end.
    #[error("bad control flow: {0}")]
    BadControlFlow(String),
    /// A call or JIT lookup with the wrong signature.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),
    /// The LLVM verifier rejected the module.
    #[error("verifier rejected module: {0}")]
    VerifierRejected(String),
    /// Reading, writing or linking a module failed.
    #[error("i/o error: {0}")]
    Io(String),
    /// No enclosing scope provides the required module, function or block.
    #[error("no current {0}")]
    NoScope(&'static str),
    /// A value was used outside the function whose body created it.
    #[error("value `{0}` belongs to a different function")]
    ForeignValue(String),
    /// The LLVM builder refused an instruction.
    #[error("builder: {0}")]
    Builder(String),
    /// Any other diagnostic reported by LLVM.
    #[error("llvm: {0}")]
    Llvm(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn mismatch(what: impl std::fmt::Display) -> Self {
        Self::TypeMismatch(what.to_string())
    }

    pub(crate) fn bad_flow(what: impl std::fmt::Display) -> Self {
        Self::BadControlFlow(what.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<BuilderError> for Error {
    fn from(e: BuilderError) -> Self {
        Self::Builder(e.to_string())
    }
}

impl From<LLVMString> for Error {
    fn from(s: LLVMString) -> Self {
        Self::Llvm(s.to_string())
    }
}
