//! Enumerated column values stored as text
//!
//! Every enum round-trips through the same snake_case string in JSON and in
//! the database. Parsing an unknown value yields `Error::InvalidInput`.

/// Declare a text-backed enum with `as_str`, `Display`, `FromStr` and serde
/// support.
///
/// ```
/// qms_common::string_enum! {
///     /// Traffic light
///     pub enum Light("light") {
///         Red => "red",
///         Green => "green",
///     }
/// }
///
/// assert_eq!("red".parse::<Light>().unwrap(), Light::Red);
/// assert_eq!(Light::Green.to_string(), "green");
/// assert!("blue".parse::<Light>().is_err());
/// ```
#[macro_export]
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($label:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::Error;

            fn from_str(s: &str) -> $crate::Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::Error::InvalidInput(format!(
                        "Invalid {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Improvement idea lifecycle
    pub enum IdeaStatus("idea status") {
        Submitted => "submitted",
        UnderReview => "under_review",
        Approved => "approved",
        Rejected => "rejected",
        InProgress => "in_progress",
        Implemented => "implemented",
        Closed => "closed",
    }
}

string_enum! {
    pub enum IdeaAction("idea action") {
        Review => "review",
        Approve => "approve",
        Reject => "reject",
        Start => "start",
        Implement => "implement",
        Close => "close",
    }
}

string_enum! {
    /// Implementation task lifecycle
    pub enum TaskStatus("task status") {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Blocked => "blocked",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum TaskAction("task action") {
        Complete => "complete",
    }
}

string_enum! {
    pub enum AuditType("audit type") {
        Internal => "internal",
        External => "external",
        Supplier => "supplier",
        Certification => "certification",
    }
}

string_enum! {
    /// Audit lifecycle
    pub enum AuditStatus("audit status") {
        Planned => "planned",
        InProgress => "in_progress",
        Completed => "completed",
        Closed => "closed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum AuditAction("audit action") {
        Start => "start",
        Complete => "complete",
        Close => "close",
        Cancel => "cancel",
    }
}

string_enum! {
    pub enum FindingSeverity("finding severity") {
        Observation => "observation",
        Minor => "minor",
        Major => "major",
        Critical => "critical",
    }
}

string_enum! {
    pub enum FindingStatus("finding status") {
        Open => "open",
        UnderReview => "under_review",
        ActionPlanned => "action_planned",
        Resolved => "resolved",
        Closed => "closed",
    }
}

string_enum! {
    pub enum NcrSource("NCR source") {
        Internal => "internal",
        Audit => "audit",
        CustomerComplaint => "customer_complaint",
        Supplier => "supplier",
    }
}

string_enum! {
    pub enum NcrSeverity("NCR severity") {
        Minor => "minor",
        Major => "major",
        Critical => "critical",
    }
}

string_enum! {
    /// Non-conformance report lifecycle
    pub enum NcrStatus("NCR status") {
        Open => "open",
        UnderInvestigation => "under_investigation",
        Resolved => "resolved",
        Closed => "closed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum NcrAction("NCR action") {
        Investigate => "investigate",
        Resolve => "resolve",
        Reopen => "reopen",
        Close => "close",
        Cancel => "cancel",
    }
}

string_enum! {
    pub enum CapaType("CAPA type") {
        Corrective => "corrective",
        Preventive => "preventive",
    }
}

string_enum! {
    pub enum Priority("priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Corrective/preventive action lifecycle
    pub enum CapaStatus("CAPA status") {
        Open => "open",
        InProgress => "in_progress",
        Completed => "completed",
        Verified => "verified",
        Closed => "closed",
    }
}

string_enum! {
    pub enum CapaAction("CAPA action") {
        Start => "start",
        Complete => "complete",
        Verify => "verify",
        Reopen => "reopen",
        Close => "close",
    }
}

string_enum! {
    pub enum ImportStatus("import status") {
        Completed => "completed",
        Partial => "partial",
        Failed => "failed",
    }
}

impl ImportStatus {
    /// Outcome of an import from its row counts
    pub fn from_counts(success_rows: i64, failed_rows: i64) -> Self {
        if failed_rows == 0 {
            ImportStatus::Completed
        } else if success_rows == 0 {
            ImportStatus::Failed
        } else {
            ImportStatus::Partial
        }
    }
}
