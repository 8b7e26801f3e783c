use std::fmt;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GradeError;

/// First school year offered by the period selector.
pub const FIRST_CATALOG_YEAR: i32 = 2023;
pub const TERMS_PER_YEAR: u8 = 4;

/// Academic term token in the form `"<year>-<term>"`.
///
/// The token is compared as an opaque string; the year and term parts are
/// only split out for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(String);

impl Period {
    pub fn parse(raw: &str) -> Result<Self, GradeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GradeError::Validation("period is required".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(GradeError::Validation(format!(
                "period {trimmed:?} must not contain whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn from_parts(year: i32, term: u8) -> Self {
        Self(format!("{year}-{term}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn year(&self) -> Option<&str> {
        self.0.split_once('-').map(|(year, _)| year)
    }

    pub fn term(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, term)| term)
    }

    /// Human label such as `2025 - First Term`; falls back to the raw token.
    pub fn label(&self) -> String {
        match (self.year(), self.term().and_then(term_label)) {
            (Some(year), Some(term)) => format!("{year} - {term}"),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn term_label(term: &str) -> Option<&'static str> {
    match term {
        "1" => Some("First Term"),
        "2" => Some("Second Term"),
        "3" => Some("Third Term"),
        "4" => Some("Fourth Term"),
        _ => None,
    }
}

/// Every selectable period from [`FIRST_CATALOG_YEAR`] through `current_year`.
pub fn catalog(current_year: i32) -> Vec<Period> {
    (FIRST_CATALOG_YEAR..=current_year)
        .flat_map(|year| (1..=TERMS_PER_YEAR).map(move |term| Period::from_parts(year, term)))
        .collect()
}

pub fn current_catalog() -> Vec<Period> {
    catalog(Utc::now().year())
}
