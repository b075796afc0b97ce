//! Core lead model, header vocabulary and pure helpers for the replication engine.

pub mod a1;
pub mod codec;
pub mod error;
pub mod phone;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use codec::{normalize_header, HeaderIndex};
pub use error::SyncError;
pub use phone::{canonicalize_phone, PhoneFormat};

pub const CRATE_NAME: &str = "leadsync-core";

/// Assignee written when a lead's phone is already owned by another lead.
pub const DUPLICATE_SENTINEL: &str = "Duplicate";

/// Number of follow-up column groups a tab may carry.
pub const FOLLOW_UP_SLOTS: u8 = 5;

/// Immutable identity of a lead across every copy of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadKey {
    pub batch_name: String,
    pub sheet_name: String,
    pub sheet_lead_id: String,
}

impl LeadKey {
    pub fn new(
        batch_name: impl Into<String>,
        sheet_name: impl Into<String>,
        sheet_lead_id: impl Into<String>,
    ) -> Self {
        Self {
            batch_name: batch_name.into(),
            sheet_name: sheet_name.into(),
            sheet_lead_id: sheet_lead_id.into(),
        }
    }
}

impl fmt::Display for LeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.batch_name, self.sheet_name, self.sheet_lead_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub schedule: String,
    pub actual_date: String,
    pub answered: String,
    pub comment: String,
}

impl FollowUp {
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
            && self.actual_date.is_empty()
            && self.answered.is_empty()
            && self.comment.is_empty()
    }
}

/// Attributes captured at data entry. The spreadsheet tier owns these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeFields {
    pub platform: String,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub created_date: String,
    pub notes: String,
    /// Batch-specific questionnaire columns keyed by normalized header.
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

/// Attributes produced by officer workflow. The relational tier owns these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalFields {
    pub status: String,
    pub assigned_to: String,
    pub priority: String,
    pub next_follow_up: String,
    pub call_feedback: String,
    pub pdf_sent: String,
    pub wa_sent: String,
    pub email_sent: String,
    pub last_follow_up_comment: String,
    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub key: LeadKey,
    /// One-based row in the tab the lead was read from.
    pub row_number: usize,
    pub intake: IntakeFields,
    pub ops: OperationalFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Unassigned,
    AssignedTo(String),
    Duplicate,
}

impl Assignment {
    pub fn from_cell(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            Self::Unassigned
        } else if is_sentinel(value) {
            Self::Duplicate
        } else {
            Self::AssignedTo(value.to_string())
        }
    }

    pub fn officer(&self) -> Option<&str> {
        match self {
            Self::AssignedTo(name) => Some(name),
            _ => None,
        }
    }
}

impl Lead {
    pub fn new(key: LeadKey, row_number: usize) -> Self {
        Self {
            key,
            row_number,
            intake: IntakeFields::default(),
            ops: OperationalFields::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.key.sheet_lead_id
    }

    pub fn assignment(&self) -> Assignment {
        Assignment::from_cell(&self.ops.assigned_to)
    }

    pub fn get(&self, field: LeadField) -> &str {
        match field {
            LeadField::Id => &self.key.sheet_lead_id,
            LeadField::Platform => &self.intake.platform,
            LeadField::FullName => &self.intake.full_name,
            LeadField::Phone => &self.intake.phone,
            LeadField::Email => &self.intake.email,
            LeadField::CreatedDate => &self.intake.created_date,
            LeadField::Notes => &self.intake.notes,
            LeadField::Status => &self.ops.status,
            LeadField::AssignedTo => &self.ops.assigned_to,
            LeadField::Priority => &self.ops.priority,
            LeadField::NextFollowUp => &self.ops.next_follow_up,
            LeadField::CallFeedback => &self.ops.call_feedback,
            LeadField::PdfSent => &self.ops.pdf_sent,
            LeadField::WaSent => &self.ops.wa_sent,
            LeadField::EmailSent => &self.ops.email_sent,
            LeadField::LastFollowUpComment => &self.ops.last_follow_up_comment,
            LeadField::FollowUp { slot, part } => {
                match self.ops.follow_ups.get(usize::from(slot).saturating_sub(1)) {
                    Some(f) => match part {
                        FollowUpPart::Schedule => &f.schedule,
                        FollowUpPart::Date => &f.actual_date,
                        FollowUpPart::Answered => &f.answered,
                        FollowUpPart::Comment => &f.comment,
                    },
                    None => "",
                }
            }
        }
    }

    pub fn set(&mut self, field: LeadField, value: impl Into<String>) {
        let value = value.into();
        let slot_ref = match field {
            LeadField::Id => &mut self.key.sheet_lead_id,
            LeadField::Platform => &mut self.intake.platform,
            LeadField::FullName => &mut self.intake.full_name,
            LeadField::Phone => &mut self.intake.phone,
            LeadField::Email => &mut self.intake.email,
            LeadField::CreatedDate => &mut self.intake.created_date,
            LeadField::Notes => &mut self.intake.notes,
            LeadField::Status => &mut self.ops.status,
            LeadField::AssignedTo => &mut self.ops.assigned_to,
            LeadField::Priority => &mut self.ops.priority,
            LeadField::NextFollowUp => &mut self.ops.next_follow_up,
            LeadField::CallFeedback => &mut self.ops.call_feedback,
            LeadField::PdfSent => &mut self.ops.pdf_sent,
            LeadField::WaSent => &mut self.ops.wa_sent,
            LeadField::EmailSent => &mut self.ops.email_sent,
            LeadField::LastFollowUpComment => &mut self.ops.last_follow_up_comment,
            LeadField::FollowUp { slot, part } => {
                let idx = usize::from(slot).saturating_sub(1);
                if self.ops.follow_ups.len() <= idx {
                    self.ops.follow_ups.resize_with(idx + 1, FollowUp::default);
                }
                let follow_up = &mut self.ops.follow_ups[idx];
                match part {
                    FollowUpPart::Schedule => &mut follow_up.schedule,
                    FollowUpPart::Date => &mut follow_up.actual_date,
                    FollowUpPart::Answered => &mut follow_up.answered,
                    FollowUpPart::Comment => &mut follow_up.comment,
                }
            }
        };
        *slot_ref = value;
    }
}

pub fn is_sentinel(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(DUPLICATE_SENTINEL)
}

/// Interprets the assorted spellings officers use for checkbox-like cells.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "sent" | "done" | "✓"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpPart {
    Schedule,
    Date,
    Answered,
    Comment,
}

impl FollowUpPart {
    pub const ALL: [FollowUpPart; 4] = [Self::Schedule, Self::Date, Self::Answered, Self::Comment];

    fn suffix(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Date => "date",
            Self::Answered => "answered",
            Self::Comment => "comment",
        }
    }
}

/// Every column the codec understands by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeadField {
    Id,
    Platform,
    FullName,
    Phone,
    Email,
    CreatedDate,
    Notes,
    Status,
    AssignedTo,
    Priority,
    NextFollowUp,
    CallFeedback,
    PdfSent,
    WaSent,
    EmailSent,
    LastFollowUpComment,
    FollowUp { slot: u8, part: FollowUpPart },
}

impl LeadField {
    pub const SCALARS: [LeadField; 16] = [
        Self::Id,
        Self::Platform,
        Self::FullName,
        Self::Phone,
        Self::Email,
        Self::CreatedDate,
        Self::Notes,
        Self::Status,
        Self::AssignedTo,
        Self::Priority,
        Self::NextFollowUp,
        Self::CallFeedback,
        Self::PdfSent,
        Self::WaSent,
        Self::EmailSent,
        Self::LastFollowUpComment,
    ];

    pub fn all() -> impl Iterator<Item = LeadField> {
        let follow_ups = (1..=FOLLOW_UP_SLOTS).flat_map(|slot| {
            FollowUpPart::ALL
                .into_iter()
                .map(move |part| LeadField::FollowUp { slot, part })
        });
        Self::SCALARS.into_iter().chain(follow_ups)
    }

    pub fn header(self) -> Cow<'static, str> {
        let name = match self {
            Self::Id => "id",
            Self::Platform => "platform",
            Self::FullName => "full_name",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::CreatedDate => "created_date",
            Self::Notes => "notes",
            Self::Status => "status",
            Self::AssignedTo => "assigned_to",
            Self::Priority => "priority",
            Self::NextFollowUp => "next_follow_up",
            Self::CallFeedback => "call_feedback",
            Self::PdfSent => "pdf_sent",
            Self::WaSent => "wa_sent",
            Self::EmailSent => "email_sent",
            Self::LastFollowUpComment => "last_follow_up_comment",
            Self::FollowUp { slot, part } => {
                return Cow::Owned(format!("follow_up_{slot}_{}", part.suffix()));
            }
        };
        Cow::Borrowed(name)
    }

    /// Resolves a raw header cell. Matching ignores case and surrounding whitespace.
    pub fn from_header(raw: &str) -> Option<Self> {
        let name = normalize_header(raw);
        let field = match name.as_str() {
            "id" => Self::Id,
            "platform" => Self::Platform,
            "full_name" | "name" => Self::FullName,
            "phone" | "phone_number" | "mobile" => Self::Phone,
            "email" => Self::Email,
            "created_date" | "created_time" => Self::CreatedDate,
            "notes" => Self::Notes,
            "status" => Self::Status,
            "assigned_to" => Self::AssignedTo,
            "priority" => Self::Priority,
            "next_follow_up" => Self::NextFollowUp,
            "call_feedback" => Self::CallFeedback,
            "pdf_sent" => Self::PdfSent,
            "wa_sent" => Self::WaSent,
            "email_sent" => Self::EmailSent,
            "last_follow_up_comment" => Self::LastFollowUpComment,
            other => return Self::follow_up_from_header(other),
        };
        Some(field)
    }

    fn follow_up_from_header(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("follow_up_")?;
        let (slot, suffix) = rest.split_once('_')?;
        let slot: u8 = slot.parse().ok()?;
        if !(1..=FOLLOW_UP_SLOTS).contains(&slot) {
            return None;
        }
        let part = FollowUpPart::ALL
            .into_iter()
            .find(|part| part.suffix() == suffix)?;
        Some(Self::FollowUp { slot, part })
    }

    pub fn is_intake(self) -> bool {
        matches!(
            self,
            Self::Platform
                | Self::FullName
                | Self::Phone
                | Self::Email
                | Self::CreatedDate
                | Self::Notes
        )
    }

    pub fn is_operational(self) -> bool {
        !self.is_intake() && self != Self::Id
    }
}

/// Header row written into freshly created tabs.
pub fn canonical_header() -> Vec<String> {
    LeadField::all().map(|f| f.header().into_owned()).collect()
}

/// A partial update to a lead.
///
/// A field that is absent is left untouched; a field present with an empty
/// string is cleared. Deserializes from a flat JSON object keyed by header name,
/// where `null` also clears.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, JsonValue>",
    into = "BTreeMap<String, JsonValue>"
)]
pub struct LeadUpdate {
    fields: BTreeMap<LeadField, String>,
    answers: BTreeMap<String, String>,
}

impl LeadUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: LeadField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_answer(mut self, header: &str, value: impl Into<String>) -> Self {
        self.answers.insert(normalize_header(header), value.into());
        self
    }

    pub fn set(&mut self, field: LeadField, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    pub fn remove(&mut self, field: LeadField) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn get(&self, field: LeadField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn assigned_to(&self) -> Option<&str> {
        self.get(LeadField::AssignedTo)
    }

    pub fn fields(&self) -> impl Iterator<Item = (LeadField, &str)> {
        self.fields.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn answers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.answers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Only the fields owned by the relational tier.
    pub fn operational(&self) -> impl Iterator<Item = (LeadField, &str)> {
        self.fields().filter(|(f, _)| f.is_operational())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.answers.is_empty()
    }

    pub fn apply_to(&self, lead: &mut Lead) {
        for (field, value) in self.fields() {
            lead.set(field, value);
        }
        for (header, value) in self.answers() {
            lead.intake
                .answers
                .insert(header.to_string(), value.to_string());
        }
    }
}

impl TryFrom<BTreeMap<String, JsonValue>> for LeadUpdate {
    type Error = String;

    fn try_from(map: BTreeMap<String, JsonValue>) -> Result<Self, Self::Error> {
        let mut update = LeadUpdate::new();
        for (key, value) in map {
            let text = match value {
                JsonValue::Null => String::new(),
                JsonValue::String(s) => s,
                JsonValue::Bool(b) => (if b { "TRUE" } else { "FALSE" }).to_string(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Array(_) | JsonValue::Object(_) => {
                    return Err(format!("field {key:?} must be a scalar value"));
                }
            };
            match LeadField::from_header(&key) {
                Some(field) => update.set(field, text),
                None => {
                    let header = normalize_header(&key);
                    if header.is_empty() {
                        return Err("field names must not be empty".to_string());
                    }
                    update.answers.insert(header, text);
                }
            }
        }
        Ok(update)
    }
}

impl From<LeadUpdate> for BTreeMap<String, JsonValue> {
    fn from(update: LeadUpdate) -> Self {
        let mut out = BTreeMap::new();
        for (field, value) in update.fields {
            out.insert(field.header().into_owned(), JsonValue::String(value));
        }
        for (header, value) in update.answers {
            out.insert(header, JsonValue::String(value));
        }
        out
    }
}
