//! The user profile that personalizes query expansion.

use serde::{Deserialize, Serialize};

/// IRS filing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
    QualifyingSurvivingSpouse,
}

impl FilingStatus {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            FilingStatus::Single => "single",
            FilingStatus::MarriedFilingJointly => "married filing jointly",
            FilingStatus::MarriedFilingSeparately => "married filing separately",
            FilingStatus::HeadOfHousehold => "head of household",
            FilingStatus::QualifyingSurvivingSpouse => "qualifying surviving spouse",
        }
    }
}

/// Investment risk tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
            RiskTolerance::Aggressive => "aggressive",
        }
    }
}

/// What the engine knows about the person asking. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub age: Option<u32>,
    pub filing_status: Option<FilingStatus>,
    /// Two-letter state code or state name.
    pub state: Option<String>,
    /// Free-text goals, e.g. "retire early" or "pay off student loans".
    pub goals: Vec<String>,
    pub risk_tolerance: Option<RiskTolerance>,
    pub annual_income: Option<f64>,
}

impl UserProfile {
    /// Create an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_filing_status(mut self, status: FilingStatus) -> Self {
        self.filing_status = Some(status);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goals.push(goal.into());
        self
    }

    pub fn with_risk_tolerance(mut self, risk: RiskTolerance) -> Self {
        self.risk_tolerance = Some(risk);
        self
    }

    pub fn with_annual_income(mut self, income: f64) -> Self {
        self.annual_income = Some(income);
        self
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// One-line description for prompts, e.g.
    /// `age 55; filing status single; state CA`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(age) = self.age {
            parts.push(format!("age {age}"));
        }
        if let Some(status) = self.filing_status {
            parts.push(format!("filing status {}", status.label()));
        }
        if let Some(state) = &self.state {
            parts.push(format!("state {state}"));
        }
        if !self.goals.is_empty() {
            parts.push(format!("goals: {}", self.goals.join(", ")));
        }
        if let Some(risk) = self.risk_tolerance {
            parts.push(format!("{} risk tolerance", risk.label()));
        }
        if let Some(income) = self.annual_income {
            parts.push(format!("annual income ${income:.0}"));
        }

        if parts.is_empty() {
            "no profile information".to_string()
        } else {
            parts.join("; ")
        }
    }
}
