use std::sync::Arc;
use std::time::Duration;

use leadsync_core::{FollowUpPart, Lead, LeadField, LeadKey, LeadUpdate, SyncError};
use leadsync_sheets::{MemorySheets, SpreadsheetBackend};
use leadsync_storage::{LeadStore, MemoryStore};
use leadsync_sync::{EngineConfig, LeadSync};

const HEADER: &[&str] = &["id", "full_name", "phone", "assigned_to", "status"];

struct Fixture {
    sheets: Arc<MemorySheets>,
    store: Arc<MemoryStore>,
    engine: LeadSync,
}

fn fixture() -> Fixture {
    let sheets = Arc::new(MemorySheets::new());
    sheets.put_tab(
        "admin",
        "Main Leads",
        &[
            HEADER,
            &["7", "Sam", "0771234567", "", "New"],
            &["8", "Kim", "+94 77 123 4567", "", "New"],
            &["9", "Lee", "0779999999", "", "New"],
        ],
    );
    sheets.add_spreadsheet("alice-sheet");
    sheets.add_spreadsheet("bob-sheet");

    let store = Arc::new(MemoryStore::new());
    store.register_batch("B1", "admin");
    store.register_officer("B1", "Alice", "alice-sheet");
    store.register_officer("B1", "Bob", "bob-sheet");

    let engine = LeadSync::new(
        EngineConfig::default(),
        sheets.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    Fixture {
        sheets,
        store,
        engine,
    }
}

fn assign(officer: &str) -> LeadUpdate {
    LeadUpdate::new().with(LeadField::AssignedTo, officer)
}

fn strings(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
}

async fn read(sheets: &MemorySheets, spreadsheet_id: &str, tab: &str) -> Vec<Vec<String>> {
    sheets
        .read_range(spreadsheet_id, &format!("'{tab}'"))
        .await
        .unwrap()
}

fn stored(id: &str, assigned_to: &str) -> Lead {
    let mut lead = Lead::new(LeadKey::new("B1", "Main Leads", id), 2);
    lead.ops.assigned_to = assigned_to.into();
    lead
}

#[tokio::test]
async fn assignment_fans_out_to_the_officer_mirror() {
    let f = fixture();
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();

    assert_eq!(outcome.lead.ops.assigned_to, "Alice");
    assert_eq!(outcome.previous_assignee, "");
    assert_eq!(outcome.duplicate_of, None);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[1], strings(&["7", "Sam", "0771234567", "Alice", "New"]));

    let mirror = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(mirror[0], strings(HEADER));
    assert_eq!(mirror[1], strings(&["7", "Sam", "+94 77 123 4567", "Alice", "New"]));
    assert_eq!(mirror.len(), 2);
}

#[tokio::test]
async fn second_owner_of_a_phone_becomes_duplicate() {
    let f = fixture();
    f.engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "8", assign("Bob"))
        .await
        .unwrap();

    assert_eq!(outcome.lead.ops.assigned_to, "Duplicate");
    assert_eq!(outcome.duplicate_of.as_deref(), Some("Alice"));
    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[2][3], "Duplicate");
    assert!(!f.sheets.tab_titles("bob-sheet").contains(&"Main Leads".to_string()));
}

#[tokio::test]
async fn unassigning_blanks_the_mirror_row() {
    let f = fixture();
    f.engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "7", assign(""))
        .await
        .unwrap();

    assert_eq!(outcome.previous_assignee, "Alice");
    assert_eq!(outcome.lead.ops.assigned_to, "");
    let mirror = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(mirror, vec![strings(HEADER)]);

    // The phone is free again.
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "8", assign("Bob"))
        .await
        .unwrap();
    assert_eq!(outcome.lead.ops.assigned_to, "Bob");
}

#[tokio::test]
async fn repeated_assignment_keeps_a_single_mirror_row() {
    let f = fixture();
    for _ in 0..3 {
        f.engine
            .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
            .await
            .unwrap();
    }
    let mirror = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(mirror.len(), 2);
}

#[tokio::test]
async fn reassignment_moves_the_mirror() {
    let f = fixture();
    f.engine
        .update_batch_lead("B1", "Main Leads", "9", assign("Alice"))
        .await
        .unwrap();
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "9", assign("bob"))
        .await
        .unwrap();

    assert_eq!(outcome.duplicate_of, None);
    assert_eq!(
        read(&f.sheets, "alice-sheet", "Main Leads").await,
        vec![strings(HEADER)]
    );
    let bob = read(&f.sheets, "bob-sheet", "Main Leads").await;
    assert_eq!(bob.len(), 2);
    assert_eq!(bob[1][0], "9");
    assert_eq!(bob[1][3], "bob");
}

#[tokio::test]
async fn leads_sharing_an_email_keep_separate_mirrors() {
    let f = fixture();
    let header: &[&str] = &["id", "full_name", "phone", "email", "assigned_to"];
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[
            header,
            &["7", "Sam", "0771234567", "fam@x.com", ""],
            &["8", "Kim", "0778888888", "fam@x.com", ""],
        ],
    );
    for id in ["7", "8"] {
        f.engine
            .update_batch_lead("B1", "Main Leads", id, assign("Alice"))
            .await
            .unwrap();
    }
    let alice = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(alice.len(), 3);
    assert_eq!(alice[1][0], "7");
    assert_eq!(alice[2][0], "8");

    f.engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Bob"))
        .await
        .unwrap();
    let alice = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(alice.len(), 3);
    assert!(alice[1].iter().all(|cell| cell.is_empty()));
    assert_eq!(alice[2], strings(&["8", "Kim", "+94 77 888 8888", "fam@x.com", "Alice"]));
    let bob = read(&f.sheets, "bob-sheet", "Main Leads").await;
    assert_eq!(bob.len(), 2);
    assert_eq!(bob[1][0], "7");
}

#[tokio::test]
async fn mirror_outage_keeps_the_admin_write() {
    let f = fixture();
    // Warm the duplicate index while every spreadsheet is reachable.
    f.engine
        .get_assignee_for_duplicate_phone("B1", "0771234567")
        .await
        .unwrap();
    f.sheets.set_offline("alice-sheet", true);

    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();
    assert_eq!(outcome.lead.ops.assigned_to, "Alice");
    assert_eq!(outcome.warnings.len(), 1, "{:?}", outcome.warnings);
    assert!(outcome.warnings[0].contains("Alice"));
    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[1][3], "Alice");

    // The next push repairs the missing mirror.
    f.sheets.set_offline("alice-sheet", false);
    let report = f.engine.sync_assignments_to_sheets("B1", None).await.unwrap();
    assert!(report.tab("Main Leads").unwrap().warnings.is_empty());
    let mirror = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(mirror.len(), 2);
    assert_eq!(mirror[1][0], "7");
}

#[tokio::test]
async fn unreadable_tabs_hold_back_the_duplicate_check() {
    let f = fixture();
    f.sheets.put_tab(
        "admin",
        "Extra Leads",
        &[HEADER, &["1", "Jo", "+94 77 123 4567", "Alice", ""]],
    );
    f.sheets.fail_reads_for("admin", "Extra Leads");

    let err = f
        .engine
        .update_batch_lead("B1", "Main Leads", "8", assign("Bob"))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(f
        .engine
        .get_assignee_for_duplicate_phone("B1", "0779999999")
        .await
        .unwrap_err()
        .is_transient());
    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[2][3], "");
    assert!(!f.sheets.tab_titles("bob-sheet").contains(&"Main Leads".to_string()));

    // Nothing partial was cached, so the next call sees the owner.
    f.sheets.restore_reads_for("admin", "Extra Leads");
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "8", assign("Bob"))
        .await
        .unwrap();
    assert_eq!(outcome.lead.ops.assigned_to, "Duplicate");
    assert_eq!(outcome.duplicate_of.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn updates_project_operational_fields_into_the_store() {
    let f = fixture();
    f.engine.sync_batch_to_store("B1", None).await.unwrap();
    let update = assign("Alice").with(LeadField::Status, "Contacted");
    f.engine
        .update_batch_lead("B1", "Main Leads", "7", update)
        .await
        .unwrap();

    let lead = f
        .store
        .get_lead(&LeadKey::new("B1", "Main Leads", "7"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.ops.assigned_to, "Alice");
    assert_eq!(lead.ops.status, "Contacted");
}

#[tokio::test]
async fn store_outage_does_not_undo_the_admin_write() {
    let f = fixture();
    let leads = Arc::new(MemoryStore::new());
    let engine = LeadSync::new(
        EngineConfig::default(),
        f.sheets.clone(),
        f.store.clone(),
        f.store.clone(),
        leads.clone(),
    );
    leads.set_unavailable(true);

    let outcome = engine
        .update_batch_lead("B1", "Main Leads", "9", assign("Alice"))
        .await
        .unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].starts_with("store projection"));
    assert_eq!(read(&f.sheets, "admin", "Main Leads").await[3][3], "Alice");
    assert_eq!(read(&f.sheets, "alice-sheet", "Main Leads").await.len(), 2);
}

#[tokio::test]
async fn registry_outage_fails_before_any_write() {
    let f = fixture();
    f.store.set_unavailable(true);
    let writes = f.sheets.write_calls();
    let err = f
        .engine
        .update_batch_lead("B1", "Main Leads", "9", assign("Alice"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(f.sheets.write_calls(), writes);
}

#[tokio::test]
async fn unknown_officer_is_a_warning_not_a_failure() {
    let f = fixture();
    let outcome = f
        .engine
        .update_batch_lead("B1", "Main Leads", "9", assign("Carol"))
        .await
        .unwrap();
    assert_eq!(outcome.lead.ops.assigned_to, "Carol");
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("Carol"));
}

#[tokio::test]
async fn lead_ids_are_immutable() {
    let f = fixture();
    let update = LeadUpdate::new().with(LeadField::Id, "99");
    let err = f
        .engine
        .update_batch_lead("B1", "Main Leads", "7", update)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));

    // Restating the same id is harmless.
    let update = assign("Alice").with(LeadField::Id, "7");
    assert!(f
        .engine
        .update_batch_lead("B1", "Main Leads", "7", update)
        .await
        .is_ok());
}

#[tokio::test]
async fn missing_bindings_and_rows_are_reported() {
    let f = fixture();
    let err = f.engine.list_sheets_for_batch("B2", false).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConfigured(_)));

    let err = f
        .engine
        .update_batch_lead("B1", "Main Leads", "404", assign("Alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    let err = f
        .engine
        .update_batch_lead("B1", " ", "7", assign("Alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
}

#[tokio::test]
async fn assignment_needs_an_assigned_to_column() {
    let f = fixture();
    f.sheets
        .put_tab("admin", "Bare", &[&["id", "phone"], &["1", "0770000000"]]);
    let err = f
        .engine
        .update_batch_lead("B1", "Bare", "1", assign("Alice"))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::schema_mismatch("Bare", "assigned_to"));
}

#[tokio::test]
async fn duplicate_lookup_canonicalizes_and_skips_blank_phones() {
    let f = fixture();
    f.engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();
    let reads = f.sheets.read_calls();

    assert_eq!(
        f.engine
            .get_assignee_for_duplicate_phone("B1", "+94 (77) 123-4567")
            .await
            .unwrap(),
        "Alice"
    );
    assert_eq!(
        f.engine.get_assignee_for_duplicate_phone("B1", "  ").await.unwrap(),
        ""
    );
    assert_eq!(
        f.engine
            .get_assignee_for_duplicate_phone("B1", "0770000001")
            .await
            .unwrap(),
        ""
    );
    // Served from the patched index.
    assert_eq!(f.sheets.read_calls(), reads);
}

#[tokio::test(start_paused = true)]
async fn duplicate_index_expires_after_its_ttl() {
    let f = fixture();
    assert_eq!(
        f.engine
            .get_assignee_for_duplicate_phone("B1", "0771234567")
            .await
            .unwrap(),
        ""
    );

    // An edit made directly in the spreadsheet.
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[HEADER, &["7", "Sam", "0771234567", "Alice", "New"]],
    );
    assert_eq!(
        f.engine
            .get_assignee_for_duplicate_phone("B1", "0771234567")
            .await
            .unwrap(),
        ""
    );

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(
        f.engine
            .get_assignee_for_duplicate_phone("B1", "0771234567")
            .await
            .unwrap(),
        "Alice"
    );
}

#[tokio::test]
async fn tab_listing_survives_a_broken_cache() {
    let f = fixture();
    f.store.set_tab_cache_unavailable(true);
    for _ in 0..2 {
        assert_eq!(
            f.engine.list_sheets_for_batch("B1", false).await.unwrap(),
            vec!["Main Leads"]
        );
    }
    assert_eq!(f.sheets.metadata_calls(), 2);
}

#[tokio::test]
async fn pull_inserts_new_leads_and_refreshes_intake_only() {
    let f = fixture();
    let report = f.engine.sync_batch_to_store("B1", None).await.unwrap();
    assert!(report.success);
    let tab = report.tab("Main Leads").unwrap();
    assert_eq!((tab.inserted, tab.updated), (3, 0));
    assert_eq!(f.store.lead_count(), 3);

    // The store holds an assignee the sheet does not show yet.
    let key = LeadKey::new("B1", "Main Leads", "7");
    f.store
        .update_operational(&key, &assign("Alice"))
        .await
        .unwrap();
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[
            HEADER,
            &["7", "Samantha", "0771234567", "", "New"],
            &["8", "Kim", "+94 77 123 4567", "", "New"],
            &["9", "Lee", "0779999999", "", "New"],
            &["10", "Ash", "0771111111", "", "New"],
        ],
    );

    let report = f.engine.sync_batch_to_store("B1", None).await.unwrap();
    let tab = report.tab("Main Leads").unwrap();
    assert_eq!((tab.inserted, tab.updated), (1, 3));

    let lead = f.store.get_lead(&key).await.unwrap().unwrap();
    assert_eq!(lead.intake.full_name, "Samantha");
    assert_eq!(lead.ops.assigned_to, "Alice");
}

#[tokio::test]
async fn pull_never_touches_operational_fields_of_known_leads() {
    let f = fixture();
    f.engine.sync_batch_to_store("B1", None).await.unwrap();
    let key = LeadKey::new("B1", "Main Leads", "7");
    let worked = LeadUpdate::new()
        .with(LeadField::Status, "Called")
        .with(LeadField::AssignedTo, "Alice")
        .with(LeadField::Priority, "High")
        .with(LeadField::LastFollowUpComment, "call back friday")
        .with(
            LeadField::FollowUp {
                slot: 1,
                part: FollowUpPart::Comment,
            },
            "left voicemail",
        );
    f.store.update_operational(&key, &worked).await.unwrap();
    let before = f.store.get_lead(&key).await.unwrap().unwrap().ops;
    assert_eq!(before.priority, "High");

    // The sheet disagrees on status and assignee; only intake may move.
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[HEADER, &["7", "Samantha", "0771234567", "Bob", "Lost"]],
    );
    for _ in 0..2 {
        f.engine.sync_batch_to_store("B1", None).await.unwrap();
    }
    let after = f.store.get_lead(&key).await.unwrap().unwrap();
    assert_eq!(after.ops, before);
    assert_eq!(after.intake.full_name, "Samantha");
}

#[tokio::test]
async fn push_keeps_mirrors_of_leads_the_store_has_not_seen() {
    let f = fixture();
    f.engine
        .update_batch_lead("B1", "Main Leads", "7", assign("Alice"))
        .await
        .unwrap();
    assert_eq!(f.store.lead_count(), 0);

    let report = f.engine.sync_assignments_to_sheets("B1", None).await.unwrap();
    let tab = report.tab("Main Leads").unwrap();
    assert_eq!(tab.updated, 0);
    assert!(tab.warnings.is_empty(), "{:?}", tab.warnings);

    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[1][3], "Alice");
    let mirror = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(mirror.len(), 2);
    assert_eq!(mirror[1], strings(&["7", "Sam", "+94 77 123 4567", "Alice", "New"]));
}

#[tokio::test]
async fn pull_skips_repeated_ids_within_a_tab() {
    let f = fixture();
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[
            HEADER,
            &["7", "Sam", "0771234567", "", ""],
            &[],
            &["7", "Sam again", "0771234567", "", ""],
        ],
    );
    let report = f.engine.sync_batch_to_store("B1", None).await.unwrap();
    let tab = report.tab("Main Leads").unwrap();
    assert_eq!((tab.inserted, tab.skipped), (1, 1));
    assert_eq!(tab.warnings.len(), 1);
}

#[tokio::test]
async fn one_failing_tab_does_not_stop_the_pass() {
    let f = fixture();
    f.sheets.put_tab("admin", "Extra Leads", &[HEADER, &["1", "Jo", "0772222222", "", ""]]);
    f.sheets.fail_reads_for("admin", "Extra Leads");

    let report = f.engine.sync_batch_to_store("B1", None).await.unwrap();
    assert!(report.success);
    assert!(report.tab("Main Leads").unwrap().success);
    let failed: Vec<_> = report.failed_tabs().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].sheet_name, "Extra Leads");
    assert_eq!(failed[0].error_kind, Some("remote_transient"));
    assert_eq!(f.store.lead_count(), 3);
}

#[tokio::test]
async fn pull_can_target_selected_tabs() {
    let f = fixture();
    f.sheets.put_tab("admin", "Extra Leads", &[HEADER, &["1", "Jo", "0772222222", "", ""]]);
    let only = vec!["Extra Leads".to_string()];
    let report = f.engine.sync_batch_to_store("B1", Some(&only)).await.unwrap();
    assert_eq!(report.tabs.len(), 1);
    assert_eq!(f.store.lead_count(), 1);
}

#[tokio::test]
async fn push_writes_the_store_assignee_back_including_blanks() {
    let f = fixture();
    f.sheets.put_tab(
        "admin",
        "Main Leads",
        &[
            HEADER,
            &["7", "Sam", "0771234567", "", "New"],
            &["8", "Kim", "0778888888", "Bob", "New"],
            &["9", "Lee", "0779999999", "Carol", "New"],
        ],
    );
    f.sheets.put_tab(
        "bob-sheet",
        "Main Leads",
        &[HEADER, &["8", "Kim", "+94 77 888 8888", "Bob", "New"]],
    );
    f.store.put_lead(stored("7", "Alice"));
    f.store.put_lead(stored("8", ""));

    let report = f.engine.sync_assignments_to_sheets("B1", None).await.unwrap();
    let tab = report.tab("Main Leads").unwrap();
    assert!(tab.success);
    assert_eq!((tab.updated, tab.skipped), (2, 1));
    // Lead 9 is unknown to the store, so its admin assignee still counts.
    assert_eq!(tab.warnings.len(), 1, "{:?}", tab.warnings);
    assert!(tab.warnings[0].contains("carol"));

    let admin = read(&f.sheets, "admin", "Main Leads").await;
    assert_eq!(admin[1][3], "Alice");
    assert_eq!(admin[2][3], "");
    assert_eq!(admin[3][3], "Carol");

    let alice = read(&f.sheets, "alice-sheet", "Main Leads").await;
    assert_eq!(alice.len(), 2);
    assert_eq!(alice[1][0], "7");
    assert_eq!(
        read(&f.sheets, "bob-sheet", "Main Leads").await,
        vec![strings(HEADER)]
    );

    // A second pass has nothing left to do.
    let writes = f.sheets.write_calls();
    let report = f.engine.sync_assignments_to_sheets("B1", None).await.unwrap();
    assert_eq!(report.tab("Main Leads").unwrap().updated, 0);
    assert_eq!(f.sheets.write_calls(), writes);
}

#[tokio::test]
async fn push_requires_id_and_assignee_columns() {
    let f = fixture();
    f.sheets.put_tab("admin", "Bare", &[&["full_name", "phone"], &["Jo", "0770000000"]]);
    let report = f.engine.sync_assignments_to_sheets("B1", None).await.unwrap();
    let bare = report.tab("Bare").unwrap();
    assert!(!bare.success);
    assert_eq!(bare.error_kind, Some("schema_mismatch"));
    assert!(report.tab("Main Leads").unwrap().success);
}

#[tokio::test]
async fn added_tabs_reach_every_spreadsheet_of_the_batch() {
    let f = fixture();
    let report = f.engine.add_batch_tab("B1", "June Leads").await.unwrap();
    assert_eq!(report.spreadsheets.len(), 3);
    assert_eq!(report.failures().count(), 0);
    for id in ["admin", "alice-sheet", "bob-sheet"] {
        assert_eq!(read(&f.sheets, id, "June Leads").await, vec![strings(HEADER)]);
    }
    assert_eq!(
        f.engine.list_sheets_for_batch("B1", false).await.unwrap(),
        vec!["Main Leads", "June Leads"]
    );

    let again = f.engine.add_batch_tab("B1", "June Leads").await.unwrap();
    assert!(again.spreadsheets.iter().all(|s| s.success && s.note.is_some()));
}

#[tokio::test]
async fn removed_tabs_disappear_everywhere() {
    let f = fixture();
    f.engine.add_batch_tab("B1", "June Leads").await.unwrap();
    f.sheets.set_offline("bob-sheet", true);

    let report = f.engine.remove_batch_tab("B1", "June Leads").await.unwrap();
    assert!(report.success);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].officer.as_deref(), Some("Bob"));
    assert!(!f.sheets.tab_titles("admin").contains(&"June Leads".to_string()));
    assert!(!f.sheets.tab_titles("alice-sheet").contains(&"June Leads".to_string()));
    assert_eq!(
        f.engine.list_sheets_for_batch("B1", false).await.unwrap(),
        vec!["Main Leads"]
    );

    f.sheets.set_offline("bob-sheet", false);
    let report = f.engine.remove_batch_tab("B1", "June Leads").await.unwrap();
    assert_eq!(report.failures().count(), 0);
    assert!(!f.sheets.tab_titles("bob-sheet").contains(&"June Leads".to_string()));
}

#[tokio::test]
async fn the_default_tab_cannot_be_managed() {
    let f = fixture();
    let err = f.engine.add_batch_tab("B1", "sheet1").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
    let err = f.engine.remove_batch_tab("B1", "Sheet1").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
}
