//! In-process spreadsheet backend with failure injection and call counters.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use leadsync_core::a1::{parse_range, A1Range};

use crate::{CellUpdate, SheetsError, SpreadsheetBackend, TabInfo};

pub const DEFAULT_TAB: &str = "Sheet1";

#[derive(Debug, Clone)]
struct Tab {
    title: String,
    sheet_id: i64,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct State {
    spreadsheets: BTreeMap<String, Vec<Tab>>,
    next_sheet_id: i64,
    failing_reads: HashSet<(String, String)>,
    offline: HashSet<String>,
    metadata_calls: usize,
    read_calls: usize,
    write_calls: usize,
}

impl State {
    fn check_online(&self, spreadsheet_id: &str) -> Result<(), SheetsError> {
        if self.offline.contains(spreadsheet_id) {
            return Err(SheetsError::Unavailable(format!("{spreadsheet_id} is offline")));
        }
        Ok(())
    }

    fn tabs_mut(&mut self, spreadsheet_id: &str) -> Result<&mut Vec<Tab>, SheetsError> {
        self.check_online(spreadsheet_id)?;
        self.spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| SheetsError::SpreadsheetNotFound(spreadsheet_id.to_string()))
    }

    fn tab_mut(&mut self, spreadsheet_id: &str, title: &str) -> Result<&mut Tab, SheetsError> {
        self.tabs_mut(spreadsheet_id)?
            .iter_mut()
            .find(|t| t.title == title)
            .ok_or_else(|| SheetsError::TabNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                tab: title.to_string(),
            })
    }

    fn write(&mut self, spreadsheet_id: &str, range: &str, rows: &[Vec<String>]) -> Result<(), SheetsError> {
        let parsed = parse(range)?;
        let tab = self.tab_mut(spreadsheet_id, &parsed.tab)?;
        let (first_col, _) = parsed.col_bounds();
        let (first_row, _) = parsed.row_bounds();
        for (offset, values) in rows.iter().enumerate() {
            let row_idx = first_row - 1 + offset;
            if tab.rows.len() <= row_idx {
                tab.rows.resize_with(row_idx + 1, Vec::new);
            }
            let row = &mut tab.rows[row_idx];
            if row.len() < first_col + values.len() {
                row.resize(first_col + values.len(), String::new());
            }
            for (col_offset, value) in values.iter().enumerate() {
                row[first_col + col_offset] = value.clone();
            }
        }
        Ok(())
    }
}

fn parse(range: &str) -> Result<A1Range, SheetsError> {
    parse_range(range).ok_or_else(|| SheetsError::InvalidRange(range.to_string()))
}

/// Drops trailing empty cells and rows the way the hosted API does.
fn trim_trailing(mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    for row in &mut rows {
        while row.last().is_some_and(|c| c.is_empty()) {
            row.pop();
        }
    }
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

#[derive(Debug, Default)]
pub struct MemorySheets {
    state: Mutex<State>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a spreadsheet holding only the default tab.
    pub fn add_spreadsheet(&self, spreadsheet_id: &str) {
        let mut state = self.lock();
        let sheet_id = state.next_sheet_id;
        state.next_sheet_id += 1;
        state
            .spreadsheets
            .entry(spreadsheet_id.to_string())
            .or_insert_with(|| {
                vec![Tab {
                    title: DEFAULT_TAB.to_string(),
                    sheet_id,
                    rows: Vec::new(),
                }]
            });
    }

    /// Creates or replaces a tab, creating the spreadsheet if needed.
    pub fn put_tab(&self, spreadsheet_id: &str, title: &str, rows: &[&[&str]]) {
        self.add_spreadsheet(spreadsheet_id);
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        let mut state = self.lock();
        let sheet_id = state.next_sheet_id;
        state.next_sheet_id += 1;
        let tabs = state.spreadsheets.entry(spreadsheet_id.to_string()).or_default();
        match tabs.iter_mut().find(|t| t.title == title) {
            Some(tab) => tab.rows = rows,
            None => tabs.push(Tab {
                title: title.to_string(),
                sheet_id,
                rows,
            }),
        }
    }

    /// Raw rows of a tab, untrimmed.
    pub fn tab_rows(&self, spreadsheet_id: &str, title: &str) -> Option<Vec<Vec<String>>> {
        self.lock()
            .spreadsheets
            .get(spreadsheet_id)?
            .iter()
            .find(|t| t.title == title)
            .map(|t| t.rows.clone())
    }

    pub fn tab_titles(&self, spreadsheet_id: &str) -> Vec<String> {
        self.lock()
            .spreadsheets
            .get(spreadsheet_id)
            .map(|tabs| tabs.iter().map(|t| t.title.clone()).collect())
            .unwrap_or_default()
    }

    /// Reads of `title` in `spreadsheet_id` fail with a transient error.
    pub fn fail_reads_for(&self, spreadsheet_id: &str, title: &str) {
        self.lock()
            .failing_reads
            .insert((spreadsheet_id.to_string(), title.to_string()));
    }

    pub fn restore_reads_for(&self, spreadsheet_id: &str, title: &str) {
        self.lock()
            .failing_reads
            .remove(&(spreadsheet_id.to_string(), title.to_string()));
    }

    /// Every call against `spreadsheet_id` fails with a transient error.
    pub fn set_offline(&self, spreadsheet_id: &str, offline: bool) {
        let mut state = self.lock();
        if offline {
            state.offline.insert(spreadsheet_id.to_string());
        } else {
            state.offline.remove(spreadsheet_id);
        }
    }

    pub fn metadata_calls(&self) -> usize {
        self.lock().metadata_calls
    }

    pub fn read_calls(&self) -> usize {
        self.lock().read_calls
    }

    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }
}

#[async_trait]
impl SpreadsheetBackend for MemorySheets {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SheetsError> {
        let mut state = self.lock();
        state.read_calls += 1;
        let parsed = parse(range)?;
        if state
            .failing_reads
            .contains(&(spreadsheet_id.to_string(), parsed.tab.clone()))
        {
            return Err(SheetsError::Unavailable(format!(
                "read of {range} in {spreadsheet_id} failed"
            )));
        }
        let tab = state.tab_mut(spreadsheet_id, &parsed.tab)?;
        let (first_col, last_col) = parsed.col_bounds();
        let (first_row, last_row) = parsed.row_bounds();
        let rows = tab
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx + 1 >= first_row && last_row.map_or(true, |last| idx + 1 <= last))
            .map(|(_, row)| {
                let end = last_col.map_or(row.len(), |last| (last + 1).min(row.len()));
                row.get(first_col.min(end)..end).unwrap_or_default().to_vec()
            })
            .collect();
        Ok(trim_trailing(rows))
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError> {
        let mut state = self.lock();
        state.write_calls += 1;
        state.write(spreadsheet_id, range, rows)
    }

    async fn batch_write_cells(
        &self,
        spreadsheet_id: &str,
        updates: &[CellUpdate],
    ) -> Result<(), SheetsError> {
        let mut state = self.lock();
        state.write_calls += 1;
        for update in updates {
            state.write(spreadsheet_id, &update.range, &update.values)?;
        }
        Ok(())
    }

    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>, SheetsError> {
        let mut state = self.lock();
        state.metadata_calls += 1;
        Ok(state
            .tabs_mut(spreadsheet_id)?
            .iter()
            .map(|t| TabInfo {
                title: t.title.clone(),
                sheet_id: t.sheet_id,
            })
            .collect())
    }

    async fn create_tab(&self, spreadsheet_id: &str, title: &str) -> Result<TabInfo, SheetsError> {
        let mut state = self.lock();
        let sheet_id = state.next_sheet_id;
        state.next_sheet_id += 1;
        let tabs = state.tabs_mut(spreadsheet_id)?;
        if tabs.iter().any(|t| t.title == title) {
            return Err(SheetsError::TabExists {
                spreadsheet_id: spreadsheet_id.to_string(),
                tab: title.to_string(),
            });
        }
        tabs.push(Tab {
            title: title.to_string(),
            sheet_id,
            rows: Vec::new(),
        });
        Ok(TabInfo {
            title: title.to_string(),
            sheet_id,
        })
    }

    async fn delete_tab(&self, spreadsheet_id: &str, title: &str) -> Result<(), SheetsError> {
        let mut state = self.lock();
        let tabs = state.tabs_mut(spreadsheet_id)?;
        let before = tabs.len();
        tabs.retain(|t| t.title != title);
        if tabs.len() == before {
            return Err(SheetsError::TabNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                tab: title.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::a1;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reads_trim_like_the_hosted_api() {
        let sheets = MemorySheets::new();
        sheets.put_tab("s1", "Main Leads", &[&["id", "phone"], &["7", ""], &["", ""]]);
        let rows = sheets.read_range("s1", &a1::tab_range("Main Leads")).await.unwrap();
        assert_eq!(rows, vec![strings(&["id", "phone"]), strings(&["7"])]);
    }

    #[tokio::test]
    async fn writes_land_at_the_addressed_cells() {
        let sheets = MemorySheets::new();
        sheets.put_tab("s1", "Main Leads", &[&["id", "phone", "assigned_to"], &["7", "077"]]);
        sheets
            .batch_write_cells(
                "s1",
                &[
                    CellUpdate::single(a1::cell_range("Main Leads", 2, 2), "Alice"),
                    CellUpdate::row(a1::row_range("Main Leads", 4, 2), strings(&["9", "078"])),
                ],
            )
            .await
            .unwrap();
        let rows = sheets.tab_rows("s1", "Main Leads").unwrap();
        assert_eq!(rows[1], strings(&["7", "077", "Alice"]));
        assert!(rows[2].is_empty());
        assert_eq!(rows[3], strings(&["9", "078"]));

        let column = sheets.read_range("s1", "'Main Leads'!C2:C4").await.unwrap();
        assert_eq!(column, vec![strings(&["Alice"])]);
    }

    #[tokio::test]
    async fn tabs_can_be_created_listed_and_deleted() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1");
        sheets.create_tab("s1", "Extra Leads").await.unwrap();
        assert!(matches!(
            sheets.create_tab("s1", "Extra Leads").await,
            Err(SheetsError::TabExists { .. })
        ));
        let titles: Vec<_> = sheets
            .list_tabs("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec![DEFAULT_TAB.to_string(), "Extra Leads".to_string()]);
        sheets.delete_tab("s1", "Extra Leads").await.unwrap();
        assert_eq!(sheets.tab_titles("s1"), vec![DEFAULT_TAB.to_string()]);
        assert_eq!(sheets.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let sheets = MemorySheets::new();
        sheets.put_tab("s1", "Main Leads", &[&["id"]]);
        sheets.fail_reads_for("s1", "Main Leads");
        assert!(matches!(
            sheets.read_range("s1", "'Main Leads'").await,
            Err(SheetsError::Unavailable(_))
        ));
        sheets.set_offline("s1", true);
        assert!(sheets.list_tabs("s1").await.is_err());
        assert!(matches!(
            sheets.list_tabs("missing").await,
            Err(SheetsError::SpreadsheetNotFound(_))
        ));
    }
}
