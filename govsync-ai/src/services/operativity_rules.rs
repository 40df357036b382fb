//! Deterministic classification overrides
//!
//! The AI's operative/non-operative call is unreliable for a few decision
//! shapes whose classification follows from wording alone. Rules are checked
//! in order and the first match wins.

use crate::types::Classification;
use govsync_common::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Which override fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideRule {
    /// Appointment of a person (title, or the body's opening resolution)
    Appointment,
    /// Establishing a committee or team to review a topic
    ReviewCommittee,
    /// Government position opposing a bill
    OpposeBill,
    /// Approval in principle that authorizes follow-up action
    ApproveInPrinciple,
}

impl OverrideRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideRule::Appointment => "appointment",
            OverrideRule::ReviewCommittee => "review_committee",
            OverrideRule::OpposeBill => "oppose_bill",
            OverrideRule::ApproveInPrinciple => "approve_in_principle",
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            OverrideRule::ApproveInPrinciple => Classification::Operative,
            _ => Classification::NonOperative,
        }
    }
}

impl fmt::Display for OverrideRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled override patterns
#[derive(Debug, Clone)]
pub struct OperativityRules {
    appointment: Regex,
    appointment_resolution: Regex,
    review_committee: Regex,
    oppose_bill: Regex,
    approve_in_principle: Regex,
    authorize: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Internal(format!("Override pattern '{}': {}", name, e)))
}

impl OperativityRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            appointment: compile("appointment", r"(?:^|[\s\-–(])(?:[ו]?מינוי|[ול]?מנות)\b")?,
            // Only the first sentence of the body, e.g. "הממשלה מחליטה למנות את..."
            appointment_resolution: compile(
                "appointment_resolution",
                r"^[^.]{0,120}?מחליט(?:ה|ים)\s+למנות\b",
            )?,
            review_committee: compile(
                "review_committee",
                r"(?:הקמת|להקים)\s+(?:ה)?(?:ועדה|ועדת|צוות)[^.]{0,80}?(?:לבחינת|לבחון)",
            )?,
            oppose_bill: compile("oppose_bill", r"להתנגד\s+ל(?:הצעת\s+(?:ה)?חוק|ה?חוק)")?,
            approve_in_principle: compile(
                "approve_in_principle",
                r"לאשר\s+(?:עקרונית|באופן\s+עקרוני)",
            )?,
            authorize: compile("authorize", r"להסמיך")?,
        })
    }

    /// First rule matching the decision text, if any
    ///
    /// The appointment rule reads the title and the body's opening resolution;
    /// the others read title and body.
    pub fn evaluate(&self, title: &str, body: &str) -> Option<OverrideRule> {
        if self.appointment.is_match(title)
            || self.appointment_resolution.is_match(body.trim_start())
        {
            return Some(OverrideRule::Appointment);
        }

        let text = format!("{}\n{}", title, body);
        if self.review_committee.is_match(&text) {
            return Some(OverrideRule::ReviewCommittee);
        }
        // Opposition wins over approve-in-principle wording in the same text
        if self.oppose_bill.is_match(&text) {
            return Some(OverrideRule::OpposeBill);
        }
        if self.approve_in_principle.is_match(&text) && self.authorize.is_match(&text) {
            return Some(OverrideRule::ApproveInPrinciple);
        }
        None
    }
}
