use std::fmt;

use crate::storage::RowPointer;

/// Error payload carried inside `anyhow::Error` by every engine operation.
/// `code` is the SQLSTATE of the failure.
#[derive(Debug)]
pub struct SqlError {
    pub code: &'static str,
    pub message: String,
    /// Row whose lock or version could not be certified, for conflict errors.
    pub conflict: Option<RowPointer>,
}

impl SqlError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            conflict: None,
        }
    }

    pub fn with_conflict(mut self, row: RowPointer) -> Self {
        self.conflict = Some(row);
        self
    }

    pub fn class(&self) -> ErrorClass {
        match self.code {
            "27000" => ErrorClass::TriggeredDataChange,
            "40001" | "40P01" | "55P03" => ErrorClass::Conflict,
            "54001" => ErrorClass::ResourceLimit,
            "21000" => ErrorClass::Cardinality,
            code if code.starts_with("23") => ErrorClass::IntegrityViolation,
            _ => ErrorClass::Other,
        }
    }

    /// Only concurrent-modification failures may be retried by re-running
    /// the statement unchanged.
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SqlError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    IntegrityViolation,
    TriggeredDataChange,
    Conflict,
    ResourceLimit,
    Cardinality,
    Other,
}

pub fn classify(err: &anyhow::Error) -> ErrorClass {
    err.downcast_ref::<SqlError>()
        .map(SqlError::class)
        .unwrap_or(ErrorClass::Other)
}

pub fn sqlstate(err: &anyhow::Error) -> Option<&'static str> {
    err.downcast_ref::<SqlError>().map(|sql| sql.code)
}

pub(crate) fn sql_err(code: &'static str, msg: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(SqlError::new(code, msg.into()))
}

pub(crate) fn conflict_err(
    code: &'static str,
    msg: impl Into<String>,
    row: RowPointer,
) -> anyhow::Error {
    anyhow::Error::new(SqlError::new(code, msg.into()).with_conflict(row))
}
