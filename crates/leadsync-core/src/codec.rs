//! Header-indexed row codec.
//!
//! Tabs are end-user editable, so columns are addressed by header name and the
//! name → column map is rebuilt for every tab read. Column positions are never
//! assumed.

use std::collections::HashMap;

use crate::{canonicalize_phone, Lead, LeadField, LeadKey, LeadUpdate, SyncError};

pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Field(LeadField),
    Answer(String),
}

#[derive(Debug, Clone)]
pub struct HeaderIndex {
    headers: Vec<String>,
    columns: Vec<Option<Column>>,
    by_field: HashMap<LeadField, usize>,
    by_name: HashMap<String, usize>,
}

impl HeaderIndex {
    /// When a header repeats, the leftmost column wins.
    pub fn from_header_row(row: &[String]) -> Self {
        let mut columns = Vec::with_capacity(row.len());
        let mut by_field = HashMap::new();
        let mut by_name = HashMap::new();
        for (idx, raw) in row.iter().enumerate() {
            let name = normalize_header(raw);
            if name.is_empty() || by_name.contains_key(&name) {
                columns.push(None);
                continue;
            }
            by_name.insert(name.clone(), idx);
            match LeadField::from_header(&name) {
                Some(field) if !by_field.contains_key(&field) => {
                    by_field.insert(field, idx);
                    columns.push(Some(Column::Field(field)));
                }
                Some(_) => columns.push(None),
                None => columns.push(Some(Column::Answer(name))),
            }
        }
        Self {
            headers: row.to_vec(),
            columns,
            by_field,
            by_name,
        }
    }

    /// Splits a tab's values into its header index and data rows.
    pub fn split(values: &[Vec<String>]) -> (Self, &[Vec<String>]) {
        match values.split_first() {
            Some((header, rows)) => (Self::from_header_row(header), rows),
            None => (Self::from_header_row(&[]), &[]),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn column_of(&self, field: LeadField) -> Option<usize> {
        self.by_field.get(&field).copied()
    }

    pub fn column_named(&self, header: &str) -> Option<usize> {
        self.by_name.get(&normalize_header(header)).copied()
    }

    pub fn require(&self, field: LeadField, tab: &str) -> Result<usize, SyncError> {
        self.column_of(field)
            .ok_or_else(|| SyncError::schema_mismatch(tab, field.header()))
    }

    pub fn value<'r>(&self, row: &'r [String], field: LeadField) -> &'r str {
        match self.column_of(field) {
            Some(idx) => cell(row, idx),
            None => "",
        }
    }

    /// Identity of a data row: the `ID` cell, else the canonical phone, else the
    /// normalized name plus row number, else the row number alone.
    pub fn lead_id(&self, row: &[String], row_number: usize) -> String {
        let id = self.value(row, LeadField::Id);
        if !id.is_empty() {
            return id.to_string();
        }
        let digits = canonicalize_phone(self.value(row, LeadField::Phone));
        if !digits.is_empty() {
            return format!("phone-{digits}");
        }
        let slug = self
            .value(row, LeadField::FullName)
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        if !slug.is_empty() {
            return format!("name-{slug}-r{row_number}");
        }
        format!("row-{row_number}")
    }

    pub fn parse_row(&self, row: &[String], batch: &str, sheet: &str, row_number: usize) -> Lead {
        let key = LeadKey::new(batch, sheet, self.lead_id(row, row_number));
        let mut lead = Lead::new(key, row_number);
        for (idx, column) in self.columns.iter().enumerate() {
            let value = cell(row, idx);
            match column {
                Some(Column::Field(LeadField::Id)) | None => {}
                Some(Column::Field(field)) => lead.set(*field, value),
                Some(Column::Answer(name)) => {
                    if !value.is_empty() {
                        lead.intake.answers.insert(name.clone(), value.to_string());
                    }
                }
            }
        }
        lead
    }

    /// Lays a lead out under this header. Columns the lead has no value for are blank.
    pub fn build_row(&self, lead: &Lead) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| match column {
                Some(Column::Field(field)) => lead.get(*field).to_string(),
                Some(Column::Answer(name)) => {
                    lead.intake.answers.get(name).cloned().unwrap_or_default()
                }
                None => String::new(),
            })
            .collect()
    }

    /// Applies `update` over an existing row with set-if-present semantics.
    /// Fields the header has no column for are skipped.
    pub fn merge_row(&self, old: &[String], update: &LeadUpdate) -> Vec<String> {
        let mut out = old.to_vec();
        if out.len() < self.width() {
            out.resize(self.width(), String::new());
        }
        for (field, value) in update.fields() {
            if let Some(idx) = self.column_of(field) {
                out[idx] = value.to_string();
            }
        }
        for (header, value) in update.answers() {
            if let Some(idx) = self.column_named(header) {
                out[idx] = value.to_string();
            }
        }
        out
    }

    /// Update fields that have no column under this header.
    pub fn unmapped(&self, update: &LeadUpdate) -> Vec<String> {
        let fields = update
            .fields()
            .filter(|(f, _)| self.column_of(*f).is_none())
            .map(|(f, _)| f.header().into_owned());
        let answers = update
            .answers()
            .filter(|(h, _)| self.column_named(h).is_none())
            .map(|(h, _)| h.to_string());
        fields.chain(answers).collect()
    }

    /// Zero-based index into `rows` of the first fully blank row, if any.
    pub fn first_blank(rows: &[Vec<String>]) -> Option<usize> {
        rows.iter().position(|row| is_blank_row(row))
    }
}
