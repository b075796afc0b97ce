//! Google Sheets v4 REST client.

use async_trait::async_trait;
use leadsync_storage::{ApiClient, HttpError};
use reqwest::{Method, Url};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::{CellUpdate, SheetsError, SpreadsheetBackend, TabInfo};

pub const GOOGLE_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug)]
pub struct GoogleSheetsClient {
    api: ApiClient,
    base: String,
}

impl GoogleSheetsClient {
    pub fn new(api: ApiClient) -> Self {
        Self::with_base(api, GOOGLE_SHEETS_API_BASE)
    }

    pub fn with_base(api: ApiClient, base: impl Into<String>) -> Self {
        Self {
            api,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, SheetsError> {
        let mut url = self.api.parse_url(&self.base)?;
        url.path_segments_mut()
            .map_err(|_| HttpError::Url(self.base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> Result<Url, SheetsError> {
        self.url(&[spreadsheet_id, "values", range])
    }

    async fn structural_update(
        &self,
        spreadsheet_id: &str,
        request: JsonValue,
    ) -> Result<JsonValue, SheetsError> {
        let url = self.url(&[&format!("{spreadsheet_id}:batchUpdate")])?;
        let body = json!({ "requests": [request] });
        // Adding or deleting a tab twice is not harmless, so never retry.
        Ok(self.api.send_json(Method::POST, url, Some(&body), false).await?)
    }
}

/// Flattens a `values` payload into strings. Numbers and booleans arrive typed
/// when they are not rendered.
pub fn values_from_json(payload: &JsonValue) -> Vec<Vec<String>> {
    let Some(rows) = payload.get("values").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(cell_to_string).collect())
                .unwrap_or_default()
        })
        .collect()
}

fn cell_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        other => other.to_string(),
    }
}

pub fn tabs_from_metadata(payload: &JsonValue) -> Result<Vec<TabInfo>, SheetsError> {
    let sheets = payload
        .get("sheets")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SheetsError::UnexpectedResponse("metadata without sheets".into()))?;
    sheets
        .iter()
        .map(|sheet| {
            let props = sheet.get("properties").ok_or_else(|| {
                SheetsError::UnexpectedResponse("sheet without properties".into())
            })?;
            tab_from_properties(props)
        })
        .collect()
}

fn tab_from_properties(props: &JsonValue) -> Result<TabInfo, SheetsError> {
    let title = props
        .get("title")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| SheetsError::UnexpectedResponse("sheet without title".into()))?;
    Ok(TabInfo {
        title: title.to_string(),
        sheet_id: props.get("sheetId").and_then(JsonValue::as_i64).unwrap_or(0),
    })
}

#[async_trait]
impl SpreadsheetBackend for GoogleSheetsClient {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SheetsError> {
        let mut url = self.values_url(spreadsheet_id, range)?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        let payload = self.api.send_json(Method::GET, url, None, true).await?;
        let rows = values_from_json(&payload);
        debug!(spreadsheet_id, range, rows = rows.len(), "read range");
        Ok(rows)
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError> {
        let mut url = self.values_url(spreadsheet_id, range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "USER_ENTERED");
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });
        self.api.send_json(Method::PUT, url, Some(&body), true).await?;
        Ok(())
    }

    async fn batch_write_cells(
        &self,
        spreadsheet_id: &str,
        updates: &[CellUpdate],
    ) -> Result<(), SheetsError> {
        if updates.is_empty() {
            return Ok(());
        }
        let url = self.url(&[spreadsheet_id, "values:batchUpdate"])?;
        let body = json!({
            "valueInputOption": "USER_ENTERED",
            "data": updates
                .iter()
                .map(|u| json!({ "range": u.range, "majorDimension": "ROWS", "values": u.values }))
                .collect::<Vec<_>>(),
        });
        self.api.send_json(Method::POST, url, Some(&body), true).await?;
        debug!(spreadsheet_id, cells = updates.len(), "batch wrote cells");
        Ok(())
    }

    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>, SheetsError> {
        let mut url = self.url(&[spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title,index)");
        let payload = self.api.send_json(Method::GET, url, None, true).await?;
        tabs_from_metadata(&payload)
    }

    async fn create_tab(&self, spreadsheet_id: &str, title: &str) -> Result<TabInfo, SheetsError> {
        let request = json!({ "addSheet": { "properties": { "title": title } } });
        let reply = self.structural_update(spreadsheet_id, request).await?;
        let props = reply
            .pointer("/replies/0/addSheet/properties")
            .ok_or_else(|| SheetsError::UnexpectedResponse("addSheet reply missing".into()))?;
        let tab = tab_from_properties(props)?;
        info!(spreadsheet_id, tab = %tab.title, sheet_id = tab.sheet_id, "created tab");
        Ok(tab)
    }

    async fn delete_tab(&self, spreadsheet_id: &str, title: &str) -> Result<(), SheetsError> {
        let tab = self
            .list_tabs(spreadsheet_id)
            .await?
            .into_iter()
            .find(|t| t.title == title)
            .ok_or_else(|| SheetsError::TabNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                tab: title.to_string(),
            })?;
        let request = json!({ "deleteSheet": { "sheetId": tab.sheet_id } });
        self.structural_update(spreadsheet_id, request).await?;
        info!(spreadsheet_id, tab = title, "deleted tab");
        Ok(())
    }
}
