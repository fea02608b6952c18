use fp_core::lir::TempId;
use thiserror::Error;

/// Failure to compile one method body.
///
/// `NotSupported` and `InvalidOperation` describe user programs this backend
/// cannot express; every other variant is a broken contract between an earlier
/// pipeline stage and this one.
#[derive(Debug, Error)]
pub enum CilError {
    #[error("not supported: {message}")]
    NotSupported { message: String },
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
    #[error("internal compiler error: {0:#}")]
    Internal(eyre::Report),
    #[error("internal compiler error: temp {temp} has no materialization entry")]
    MissingMaterialization { temp: TempId },
    #[error("internal compiler error: stack imbalance at IL instruction {index} ({mnemonic}): {message}")]
    StackImbalance {
        index: usize,
        mnemonic: &'static str,
        message: String,
    },
    #[error(transparent)]
    Lir(#[from] fp_core::Error),
}

impl CilError {
    pub fn not_supported(message: impl Into<String>) -> Self {
        CilError::NotSupported {
            message: message.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        CilError::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CilError::Internal(eyre::Report::msg(message.into()))
    }

    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CilError::NotSupported { .. } | CilError::InvalidOperation { .. }
        )
    }
}

impl From<eyre::Report> for CilError {
    fn from(report: eyre::Report) -> Self {
        CilError::Internal(report)
    }
}

pub type Result<T> = std::result::Result<T, CilError>;
