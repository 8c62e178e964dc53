//! Diagnostics: error kinds, severities and the per-run accumulator.
//!
//! # Design
//!
//! - [`ErrorKind`] — closed taxonomy of everything the middle-end can
//!   reject, carrying the names the message needs
//! - [`CompileError`] — one diagnostic with its severity and span
//! - [`DiagnosticBag`] — append-only per-run accumulator; validation
//!   passes record everything they see, then [`DiagnosticBag::check_stop`]
//!   halts with the pass cluster's stop code if any error was recorded
//!
//! Warnings never stop the pipeline; they travel on the driver result.

use std::fmt;

use archetype_model::foundation::Span;
use archetype_model::Ident;

/// Category of middle-end diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `add`/`remove` applied directly to an asset owned by a partition
    AssetPartitionnedby(Ident, Ident),
    /// A default value uses `caller` and no caller address was supplied
    CallerNotSetInInit,
    /// `add_update` cannot build the record: a field has no default
    CannotBuildAsset(Ident, Ident),
    /// A container field references an asset that itself has containers
    ContainersInAssetContainers(Ident, Ident, Ident),
    /// The primary key field carries a default value
    DefaultValueOnKeyAsset(Ident),
    /// Two initial values share the same primary key literal
    DuplicatedKeyAsset(Ident),
    /// A default value uses a runtime-only construct
    InvalidInitValue,
    /// `clear` applied directly to a partitioned asset
    NoClearForPartitionAsset(Ident),
    /// A container field's default is not an empty literal container
    NoEmptyContainerForDefaultValue(Ident, Ident),
    /// The contract declares no entry point
    NoEntrypoint,
    /// An asset used in a partition carries initial values
    NoInitForPartitionAsset(Ident),
    /// A constant parameter has no value at deployment
    NoInitValueForConstParam(Ident),
    /// A parameter has neither default nor deployment value
    NoInitValueForParameter(Ident),
    /// `put_remove` targets an iterable big map
    NoPutRemoveForIterableBigMapAsset,
    /// `sort` names a key field of a multi-key asset
    NoSortOnKeyWithMultiKey(Ident),
    /// An asset initial value is not a literal
    OnlyLiteralInAssetInit,
    /// An entrypoint reference names an unknown contract
    UnknownContract(Ident),
    /// A function argument is never read
    UnusedArgument(Ident),
    /// A `let`-bound variable is never read
    UnusedVariable(Ident),
    /// A function signature exposes a raw asset type
    InvalidVarType(Ident),
    /// An asset update form reached runtime code it cannot express
    AssetUpdateInNonFormula,
    /// An asset method unavailable on big-map storage was used
    InvalidMethodWithBigMap(Ident),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;
        match self {
            AssetPartitionnedby(an, field) => write!(
                f,
                "cannot access asset '{an}' directly: it is partitioned by field '{field}'"
            ),
            CallerNotSetInInit => write!(
                f,
                "'caller' used in a default value; supply an address with --set-caller-init"
            ),
            CannotBuildAsset(an, field) => write!(
                f,
                "cannot build asset '{an}': field '{field}' has no default value"
            ),
            ContainersInAssetContainers(an, field, child) => write!(
                f,
                "container field '{an}.{field}' references asset '{child}' which itself contains containers"
            ),
            DefaultValueOnKeyAsset(an) => {
                write!(f, "default value on the key of asset '{an}'")
            }
            DuplicatedKeyAsset(an) => {
                write!(f, "duplicate key in initial values of asset '{an}'")
            }
            InvalidInitValue => write!(f, "initial value must be a compile-time literal"),
            NoClearForPartitionAsset(an) => {
                write!(f, "cannot clear asset '{an}': it is a partition target")
            }
            NoEmptyContainerForDefaultValue(an, field) => write!(
                f,
                "default value of container field '{an}.{field}' must be an empty container"
            ),
            NoEntrypoint => write!(f, "no entrypoint found"),
            NoInitForPartitionAsset(an) => write!(
                f,
                "asset '{an}' is used in a partition and cannot be initialized directly"
            ),
            NoInitValueForConstParam(id) => {
                write!(f, "no value for constant parameter '{id}'")
            }
            NoInitValueForParameter(id) => write!(f, "no value for parameter '{id}'"),
            NoPutRemoveForIterableBigMapAsset => write!(
                f,
                "'put_remove' is not available on assets stored as iterable big maps"
            ),
            NoSortOnKeyWithMultiKey(field) => write!(
                f,
                "cannot sort on '{field}': it is a key of a multi-key asset"
            ),
            OnlyLiteralInAssetInit => {
                write!(f, "asset initial values must be literals")
            }
            UnknownContract(id) => write!(f, "unknown contract '{id}'"),
            UnusedArgument(id) => write!(f, "unused argument '{id}'"),
            UnusedVariable(id) => write!(f, "unused variable '{id}'"),
            InvalidVarType(id) => write!(
                f,
                "function '{id}' exposes an asset type in its signature"
            ),
            AssetUpdateInNonFormula => {
                write!(f, "asset update form is only available in formulas")
            }
            InvalidMethodWithBigMap(an) => write!(
                f,
                "method unavailable on asset '{an}': it is stored as a big map"
            ),
        }
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Suspicious but legal; never stops the pipeline
    Warning,
    /// Compilation cannot proceed past the enclosing pass
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One diagnostic with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub span: Span,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.kind)
    }
}

impl std::error::Error for CompileError {}

/// Stop codes, one per pass cluster.
pub mod stop {
    /// Model construction and lowering errors
    pub const MODEL: u8 = 3;
    /// Semantic validation
    pub const CHECK: u8 = 5;
    /// Asset types exposed in function signatures
    pub const ASSET_IN_FUNCTION: u8 = 8;
}

/// Fatal pipeline stop carrying everything recorded before it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transformation stopped with code {code} ({} diagnostic(s))", diagnostics.len())]
pub struct Stop {
    pub code: u8,
    pub diagnostics: Vec<CompileError>,
}

/// Per-run diagnostic accumulator.
///
/// Append-only while a pass runs; the driver drains warnings at the end
/// of the pipeline.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    items: Vec<CompileError>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal-class diagnostic. Does not throw; the enclosing
    /// pass stops via [`DiagnosticBag::check_stop`].
    pub fn error(&mut self, span: Span, kind: ErrorKind) {
        self.items.push(CompileError {
            kind,
            severity: Severity::Error,
            span,
        });
    }

    pub fn warning(&mut self, span: Span, kind: ErrorKind) {
        self.items.push(CompileError {
            kind,
            severity: Severity::Warning,
            span,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn diagnostics(&self) -> &[CompileError] {
        &self.items
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CompileError> {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Halt with `code` if any error-severity diagnostic was recorded.
    ///
    /// Errors (and every diagnostic recorded alongside them) move into
    /// the returned [`Stop`] so the caller surfaces all of them at once.
    pub fn check_stop(&mut self, code: u8) -> Result<(), Stop> {
        if self.has_errors() {
            Err(Stop {
                code,
                diagnostics: std::mem::take(&mut self.items),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::zero(0)
    }

    #[test]
    fn test_warnings_do_not_stop() {
        let mut bag = DiagnosticBag::new();
        bag.warning(span(), ErrorKind::UnusedVariable("x".into()));
        assert!(!bag.has_errors());
        assert!(bag.check_stop(stop::CHECK).is_ok());
        assert_eq!(bag.warnings().count(), 1);
    }

    #[test]
    fn test_errors_stop_with_code() {
        let mut bag = DiagnosticBag::new();
        bag.warning(span(), ErrorKind::UnusedArgument("a".into()));
        bag.error(span(), ErrorKind::DefaultValueOnKeyAsset("mile".into()));

        let stop = bag.check_stop(stop::CHECK).unwrap_err();
        assert_eq!(stop.code, stop::CHECK);
        // The stop carries every recorded diagnostic, warnings included.
        assert_eq!(stop.diagnostics.len(), 2);
    }

    #[test]
    fn test_display_mentions_the_asset() {
        let err = CompileError {
            kind: ErrorKind::AssetPartitionnedby("mile".into(), "miles".into()),
            severity: Severity::Error,
            span: span(),
        };
        let text = err.to_string();
        assert!(text.contains("error"));
        assert!(text.contains("mile"));
        assert!(text.contains("miles"));
    }
}
