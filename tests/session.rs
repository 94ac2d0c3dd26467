//! End-to-end scenarios across the session, overlay, cache, and search.

use std::sync::Arc;

use vellum::{
    CoreConfig, CoreError, MemoryStore, ScanKind, SearchDirection, SearchHooks, Session,
    VirtualPosition,
};

fn pos(anchor: u64, offset: u64) -> VirtualPosition {
    VirtualPosition::new(anchor, offset)
}

/// A session whose dump files live in a private temp dir.
fn session_in(dir: &tempfile::TempDir, budget: u64) -> Session {
    let mut config = CoreConfig::default();
    config.storage.dump_dir = Some(dir.path().to_path_buf());
    config.cache.budget_bytes = budget;
    config.search.initial_chunk_bytes = 8;
    config.search.max_chunk_bytes = 64;
    Session::new(config)
}

#[test]
fn test_empty_window_insert_delete_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);
    let win = session
        .open_window(Arc::new(MemoryStore::empty()))
        .unwrap();

    session.add_changes(win, pos(0, 0), b"hello").unwrap();
    session.remove_characters(win, pos(0, 0), pos(0, 2)).unwrap();

    let (bytes, _) = session.continuous_chars(win, pos(0, 0), 10).unwrap();
    assert_eq!(bytes, b"llo");
    assert!(session.any_changes_made(win).unwrap());
    assert_eq!(session.inserted_bytes(win).unwrap(), 5);
    assert_eq!(session.deleted_bytes(win).unwrap(), 2);
}

#[test]
fn test_edit_save_cycle_with_file_store() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"line one\nline two\n").unwrap();
    file.flush().unwrap();

    let mut session = session_in(&dir, 1024);
    let store = Arc::new(vellum::FileStore::open(file.path()).unwrap());
    let win = session.open_window(store).unwrap();

    // Prepend a header and delete "line " from the second line.
    session.add_changes(win, pos(0, 0), b"# header\n").unwrap();
    session
        .remove_characters(win, pos(9, 0), pos(14, 0))
        .unwrap();

    let content = session.virtual_content(win).unwrap();
    assert_eq!(content, b"# header\nline one\ntwo\n");

    // The save path: stream the virtual content out, then normalize.
    std::fs::write(file.path(), &content).unwrap();
    session.normalize_after_save(win).unwrap();

    assert!(!session.any_changes_made(win).unwrap());
    let (bytes, _) = session.continuous_chars(win, pos(0, 0), 100).unwrap();
    assert_eq!(bytes, b"# header\nline one\ntwo\n");
}

#[test]
fn test_cache_pressure_spills_across_windows() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 24);
    let a = session.open_window(Arc::new(MemoryStore::empty())).unwrap();
    let b = session.open_window(Arc::new(MemoryStore::empty())).unwrap();

    session
        .add_changes(a, pos(0, 0), b"aaaaaaaaaaaaaaaa")
        .unwrap();
    // Window B's write evicts window A's least-recently-used bytes to
    // A's dump file.
    session
        .add_changes(b, pos(0, 0), b"bbbbbbbbbbbbbbbb")
        .unwrap();
    assert!(session.cache().resident_bytes() <= 24);

    // Both windows still read their own bytes; A's come back through
    // the dump fallback.
    let (bytes_a, _) = session.continuous_chars(a, pos(0, 0), 100).unwrap();
    let (bytes_b, _) = session.continuous_chars(b, pos(0, 0), 100).unwrap();
    assert_eq!(bytes_a, b"aaaaaaaaaaaaaaaa");
    assert_eq!(bytes_b, b"bbbbbbbbbbbbbbbb");
}

#[test]
fn test_cache_full_is_typed_and_leaves_state_clean() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 8);
    let win = session.open_window(Arc::new(MemoryStore::empty())).unwrap();

    let err = session
        .add_changes(win, pos(0, 0), b"way too large for the budget")
        .unwrap_err();
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::CacheFull { requested, budget }) => {
            assert_eq!(*requested, 28);
            assert_eq!(*budget, 8);
        }
        other => panic!("expected CacheFull, got {:?}", other),
    }
    // All-or-nothing: the failed write left no trace.
    assert!(!session.any_changes_made(win).unwrap());

    // An explicit stash frees what is resident for other writes.
    session.add_changes(win, pos(0, 0), b"12345678").unwrap();
    session.stash_window(win).unwrap();
    assert_eq!(session.cache().resident_bytes(), 0);
}

#[test]
fn test_stash_close_reopen_restores_edits() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new(b"0123456789".to_vec()));
    let mut session = session_in(&dir, 1024);

    let win = session.open_window(Arc::clone(&store) as _).unwrap();
    session.add_changes(win, pos(4, 0), b"<mid>").unwrap();
    session.add_changes(win, pos(10, 0), b"<end>").unwrap();
    session.close_window(win, true).unwrap();

    let win = session.reopen_window(win, Arc::clone(&store) as _).unwrap();
    assert_eq!(session.inserted_bytes(win).unwrap(), 10);
    let content = session.virtual_content(win).unwrap();
    assert_eq!(content, b"0123<mid>456789<end>");
}

#[test]
fn test_close_without_stash_discards_edits() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new(b"abc".to_vec()));
    let mut session = session_in(&dir, 1024);

    let win = session.open_window(Arc::clone(&store) as _).unwrap();
    session.add_changes(win, pos(0, 0), b"gone ").unwrap();
    session.close_window(win, false).unwrap();

    let win = session.reopen_window(win, Arc::clone(&store) as _).unwrap();
    assert!(!session.any_changes_made(win).unwrap());
    assert_eq!(session.virtual_content(win).unwrap(), b"abc");
}

#[test]
fn test_reopen_after_store_shrunk_drops_tail_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);

    let long_store = Arc::new(MemoryStore::new(b"0123456789".to_vec()));
    let win = session.open_window(Arc::clone(&long_store) as _).unwrap();
    session.add_changes(win, pos(2, 0), b"keep").unwrap();
    session.add_changes(win, pos(10, 0), b"tail").unwrap();
    session.close_window(win, true).unwrap();

    // The file shrank to 4 bytes between sessions: the end-of-store
    // insertion no longer fits and is dropped on replay.
    let short_store = Arc::new(MemoryStore::new(b"0123".to_vec()));
    let win = session.reopen_window(win, short_store).unwrap();
    assert_eq!(session.inserted_bytes(win).unwrap(), 4);
    assert_eq!(session.virtual_content(win).unwrap(), b"01keep23");
}

#[test]
fn test_search_orders_matches_around_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);
    let win = session
        .open_window(Arc::new(MemoryStore::new(b"abcXabcXabc".to_vec())))
        .unwrap();
    let hooks = SearchHooks::default();

    // Forward-first from the middle match: the later match comes before
    // the earlier one.
    let outcome = session
        .search(win, "abc", pos(4, 0), SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(outcome.nearest().unwrap().position, pos(8, 0));
    let next = session
        .next_match(win, "abc", SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(next.unwrap().position, pos(0, 0));

    // Backward-first mirrors it.
    let outcome = session
        .search(win, "abc", pos(4, 0), SearchDirection::Backward, &hooks)
        .unwrap();
    assert_eq!(outcome.nearest().unwrap().position, pos(0, 0));
    let next = session
        .next_match(win, "abc", SearchDirection::Backward, &hooks)
        .unwrap();
    assert_eq!(next.unwrap().position, pos(8, 0));
}

#[test]
fn test_search_set_exhausts_without_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);
    let win = session
        .open_window(Arc::new(MemoryStore::new(b"__needle__".to_vec())))
        .unwrap();
    let hooks = SearchHooks::default();

    let outcome = session
        .search(win, "needle", pos(0, 0), SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(outcome.nearest().unwrap().position, pos(2, 0));

    let next = session
        .next_match(win, "needle", SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(next, None);
    assert_eq!(
        session.search_engine(win).unwrap().last_scan(),
        Some(ScanKind::FromCache)
    );
}

#[test]
fn test_search_sees_pending_edits() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);
    let win = session
        .open_window(Arc::new(MemoryStore::new(b"nothing here".to_vec())))
        .unwrap();
    let hooks = SearchHooks::default();

    session.add_changes(win, pos(8, 0), b"needle ").unwrap();
    let outcome = session
        .search(win, "needle", pos(0, 0), SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(outcome.nearest().unwrap().position, pos(8, 0));

    // Deleting the match makes the next search drop it.
    session.remove_characters(win, pos(8, 0), pos(8, 6)).unwrap();
    let outcome = session
        .search(win, "needle", pos(0, 0), SearchDirection::Forward, &hooks)
        .unwrap();
    assert_eq!(outcome.nearest(), None);
}

#[test]
fn test_traversal_and_distance_through_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(&dir, 1024);
    let win = session
        .open_window(Arc::new(MemoryStore::new(b"0123456789".to_vec())))
        .unwrap();

    session.add_changes(win, pos(5, 0), b"+++").unwrap();
    session.remove_characters(win, pos(1, 0), pos(3, 0)).unwrap();

    // Walking forward visits 0, 3, 4, +, +, +, 5, ...
    let first = session.first_valid_position(win).unwrap().unwrap();
    assert_eq!(first, pos(0, 0));
    let second = session.next_position(win, first).unwrap().unwrap();
    assert_eq!(second, pos(3, 0));
    assert_eq!(
        session.prev_position(win, second).unwrap(),
        Some(first)
    );

    // Distance end to end: 10 store bytes + 3 inserted - 2 deleted.
    let end = pos(10, 0);
    assert_eq!(session.diff_bytes(win, pos(0, 0), end).unwrap(), 11);
    assert_eq!(
        session.diff_bytes(win, end, pos(0, 0)).unwrap(),
        session.diff_bytes(win, pos(0, 0), end).unwrap()
    );

    // A paste that must not count its own source range.
    let skip = [vellum::VirtualRange::new(pos(5, 0), pos(5, 3))];
    assert_eq!(
        session.diff_bytes_skipping(win, pos(0, 0), end, &skip).unwrap(),
        8
    );

    // Deletion boundary queries and rollback.
    assert!(session.is_deleted(win, pos(1, 0)).unwrap());
    assert_eq!(session.deletion_start(win, pos(2, 0)).unwrap(), Some(pos(1, 0)));
    assert_eq!(session.deletion_end(win, pos(2, 0)).unwrap(), Some(pos(3, 0)));
    session.undelete(win, pos(1, 0), pos(3, 0)).unwrap();
    assert_eq!(session.deleted_bytes(win).unwrap(), 0);
    assert_eq!(session.diff_bytes(win, pos(0, 0), end).unwrap(), 13);

    // The backing store has not changed underneath the window.
    assert_eq!(session.reload_store(win).unwrap(), None);
}
