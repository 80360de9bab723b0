//! Non-fatal problems found while generating a module.
//!
//! Generation never stops for a single bad declaration. Whatever gets
//! dropped is reported through a [`WarningSink`] and generation goes on
//! with the rest.

use std::fmt;

use tracing::warn;

/// What kind of thing was dropped or adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCategory {
    /// A function, method, constructor or proxy that could not be wrapped.
    SkippedDeclaration,
    /// One signature removed from an overload group.
    DroppedCandidate,
    /// A whole overload group that produced nothing.
    SkippedGroup,
    /// An `implicitly_converts_to` target that is not a wrapped class.
    ImplicitConversion,
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningCategory::SkippedDeclaration => "skipped-declaration",
            WarningCategory::DroppedCandidate => "dropped-candidate",
            WarningCategory::SkippedGroup => "skipped-group",
            WarningCategory::ImplicitConversion => "implicit-conversion",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub category: WarningCategory,
    pub message: String,
    /// The declaration the warning is about, e.g. `Foo::bar`.
    pub location: Option<String>,
}

impl Warning {
    pub fn new(category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {} [{}]", self.message, self.category),
            None => write!(f, "{} [{}]", self.message, self.category),
        }
    }
}

/// Receiver of generation warnings.
pub trait WarningSink {
    fn warn(&mut self, warning: Warning);
}

/// Collects every warning and logs it as it arrives.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn count(&self, category: WarningCategory) -> usize {
        self.warnings.iter().filter(|w| w.category == category).count()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

impl WarningSink for Diagnostics {
    fn warn(&mut self, warning: Warning) {
        warn!(
            category = %warning.category,
            location = warning.location.as_deref().unwrap_or("-"),
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }
}
