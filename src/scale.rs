use std::fmt;
use std::str::FromStr;

use crate::error::GradeError;
use crate::models::Score;

/// Grading policy chosen by the caller; the engine only asks it to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GradingScale {
    /// Whole numbers from 0 to 10.
    #[default]
    #[value(name = "integer-10")]
    Integer10,
    /// Any value from 0.0 to 5.0.
    #[value(name = "continuous-5")]
    Continuous5,
}

impl GradingScale {
    pub fn max(self) -> f64 {
        match self {
            GradingScale::Integer10 => 10.0,
            GradingScale::Continuous5 => 5.0,
        }
    }

    pub fn passing_threshold(self) -> f64 {
        match self {
            GradingScale::Integer10 => 6.0,
            GradingScale::Continuous5 => 3.0,
        }
    }

    pub fn is_passing(self, score: Score) -> bool {
        score.value() >= self.passing_threshold()
    }

    pub fn validate(self, value: f64) -> Result<Score, GradeError> {
        if !value.is_finite() {
            return Err(GradeError::Validation(format!(
                "score {value} is not a number"
            )));
        }
        if !(0.0..=self.max()).contains(&value) {
            return Err(GradeError::Validation(format!(
                "score {value} is outside 0..={} for the {self} scale",
                self.max()
            )));
        }
        if self == GradingScale::Integer10 && value.fract() != 0.0 {
            return Err(GradeError::Validation(format!(
                "score {value} must be a whole number on the {self} scale"
            )));
        }
        Ok(Score::new_unchecked(value))
    }
}

impl fmt::Display for GradingScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradingScale::Integer10 => f.write_str("integer-10"),
            GradingScale::Continuous5 => f.write_str("continuous-5"),
        }
    }
}

impl FromStr for GradingScale {
    type Err = GradeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "integer-10" => Ok(GradingScale::Integer10),
            "continuous-5" => Ok(GradingScale::Continuous5),
            other => Err(GradeError::Config(format!(
                "unknown grading scale {other:?}, expected integer-10 or continuous-5"
            ))),
        }
    }
}
