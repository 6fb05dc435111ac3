use thiserror::Error;

/// Typed errors for the aggregation core.
///
/// Mutation and rebuild entry points return `anyhow::Result`; these
/// variants ride the chain so callers can branch with
/// `err.downcast_ref::<CoreError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The record has no derivable election cycle.
    #[error("record {sub_id}: no derivable election cycle from report year {report_year:?}")]
    InvalidDate {
        sub_id: i64,
        report_year: Option<i64>,
    },

    /// An update or delete addressed a ledger row that does not exist.
    #[error("ledger record {sub_id} not found")]
    RecordNotFound { sub_id: i64 },

    /// An audit scan found rollup rows that disagree with the ledger.
    #[error("{mismatches} aggregate row(s) disagree with the ledger in {table}")]
    InconsistentAggregate { table: String, mismatches: usize },

    /// A write or a second rebuild targeted a scope under rebuild.
    #[error("scope {scope} is being rebuilt; retry after it completes")]
    RebuildInProgress { scope: String },
}

impl CoreError {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidDate { .. } => "E2001",
            Self::RecordNotFound { .. } => "E2002",
            Self::InconsistentAggregate { .. } => "E3001",
            Self::RebuildInProgress { .. } => "E5001",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidDate { .. } => {
                Some("Fix the report year on the source filing and resubmit.")
            }
            Self::RecordNotFound { .. } => None,
            Self::InconsistentAggregate { .. } => {
                Some("Run `tally rebuild` over the affected cycles, then audit again.")
            }
            Self::RebuildInProgress { .. } => {
                Some("Retry once `tally rebuild` finishes, or clear stale locks with --break-locks.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            CoreError::InvalidDate {
                sub_id: 1,
                report_year: None,
            },
            CoreError::RecordNotFound { sub_id: 1 },
            CoreError::InconsistentAggregate {
                table: "totals_by_state".into(),
                mismatches: 1,
            },
            CoreError::RebuildInProgress {
                scope: "all".into(),
            },
        ];

        let mut seen = HashSet::new();
        for error in all {
            assert!(seen.insert(error.code()), "duplicate code {}", error.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = CoreError::RecordNotFound { sub_id: 7 }.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn downcasts_through_anyhow_chains() {
        let err = anyhow::Error::new(CoreError::RebuildInProgress {
            scope: "2016:2020".into(),
        })
        .context("insert ledger record 42");

        let core = err
            .downcast_ref::<CoreError>()
            .expect("typed error survives context");
        assert_eq!(core.code(), "E5001");
    }
}
