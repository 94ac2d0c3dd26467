//! The session context.
//!
//! A [`Session`] owns everything that used to be process-global in
//! editors of this shape: the window table, the shared insertion cache
//! with its byte budget, and the per-window search engines. Nothing here
//! is static, so independent sessions (and tests) coexist freely.
//!
//! Session methods return `anyhow::Result`; the typed core outcomes
//! (`CacheFull`, `CacheMiss`, `BackingStoreUnavailable`) travel inside
//! and can be recovered with `err.downcast_ref::<CoreError>()`; the
//! usual reaction to `CacheFull` is [`Session::stash_window`] followed by
//! a retry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use vellum_cache::InsertCache;
use vellum_core::{VirtualPosition, VirtualRange, WindowId};
use vellum_overlay::Overlay;
use vellum_search::{SearchDirection, SearchEngine, SearchHooks, SearchMatch, SearchOutcome};
use vellum_store::{BackingStore, DumpFile};

use crate::config::CoreConfig;

/// One open window: its overlay and where its dump file lives.
struct Window {
    overlay: Overlay,
    dump_path: PathBuf,
}

/// Owns all per-session editing state.
pub struct Session {
    config: CoreConfig,
    cache: InsertCache,
    windows: HashMap<WindowId, Window>,
    engines: HashMap<WindowId, SearchEngine>,
    next_window: u64,
}

impl Session {
    /// Create a session from a configuration.
    pub fn new(config: CoreConfig) -> Self {
        let cache = InsertCache::new(config.cache.budget_bytes);
        Self {
            config,
            cache,
            windows: HashMap::new(),
            engines: HashMap::new(),
            next_window: 1,
        }
    }

    /// Session with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CoreConfig::default())
    }

    /// Number of open windows.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// The shared insertion cache (for budget introspection).
    pub fn cache(&self) -> &InsertCache {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Window lifecycle
    // ------------------------------------------------------------------

    /// Open a window over `store`.
    ///
    /// When a dump file from an earlier session exists for this store it
    /// is replayed: the change table is rebuilt and the insertion bytes
    /// become readable again (records beyond the current store size are
    /// discarded).
    pub fn open_window(&mut self, store: Arc<dyn BackingStore>) -> Result<WindowId> {
        let id = WindowId::from_raw(self.next_window);
        self.next_window += 1;
        self.open_window_as(id, store)
    }

    /// Re-open a window under a previous window's identity, replaying
    /// the dump that identity left behind (see
    /// [`Session::close_window`] with `stash = true`).
    pub fn reopen_window(&mut self, id: WindowId, store: Arc<dyn BackingStore>) -> Result<WindowId> {
        if self.windows.contains_key(&id) {
            bail!("{} is already open", id);
        }
        self.next_window = self.next_window.max(id.as_raw() + 1);
        self.open_window_as(id, store)
    }

    fn open_window_as(&mut self, id: WindowId, store: Arc<dyn BackingStore>) -> Result<WindowId> {
        let dump_dir = self.config.dump_dir()?;
        let dump_path = dump_dir.join(format!("{}.dump", id));
        let existing = dump_path.exists();
        let dump = if existing {
            DumpFile::open(&dump_path)
                .with_context(|| format!("Failed to open dump file: {}", dump_path.display()))?
        } else {
            DumpFile::create(&dump_path)
                .with_context(|| format!("Failed to create dump file: {}", dump_path.display()))?
        };

        self.cache.register_window(id, dump);
        let mut overlay = Overlay::new(id, store);
        if existing {
            overlay
                .restore_from_dump(&mut self.cache)
                .with_context(|| format!("Failed to replay dump for {}", id))?;
        }

        self.engines
            .insert(id, SearchEngine::with_config(id, self.config.search_config()));
        self.windows.insert(id, Window { overlay, dump_path });
        vellum_logger::info(format!("opened {}", id));
        Ok(id)
    }

    /// Close a window.
    ///
    /// With `stash = true` pending insertion bytes are flushed to the
    /// window's dump file, which is kept so a later
    /// [`Session::reopen_window`] can restore the edits. Otherwise the
    /// dump file is deleted and pending edits are gone.
    pub fn close_window(&mut self, id: WindowId, stash: bool) -> Result<()> {
        let window = match self.windows.remove(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        self.engines.remove(&id);

        if stash {
            self.cache
                .stash_window(id)
                .with_context(|| format!("Failed to stash {}", id))?;
            self.cache.release_window(id);
        } else {
            self.cache.release_window(id);
            if window.dump_path.exists() {
                std::fs::remove_file(&window.dump_path).with_context(|| {
                    format!("Failed to remove dump file: {}", window.dump_path.display())
                })?;
            }
        }
        vellum_logger::info(format!("closed {} (stash: {})", id, stash));
        Ok(())
    }

    /// Flush a window's cached insertion bytes to its dump file, freeing
    /// global budget. The explicit recovery step after `CacheFull`.
    pub fn stash_window(&mut self, id: WindowId) -> Result<u64> {
        self.window(id)?;
        Ok(self.cache.stash_window(id)?)
    }

    /// Poll the window's backing store for external modification.
    pub fn reload_store(&mut self, id: WindowId) -> Result<Option<(u64, u64)>> {
        let window = self.window(id)?;
        Ok(window.overlay.store().reload()?)
    }

    // ------------------------------------------------------------------
    // Editing operations (delegated to the overlay)
    // ------------------------------------------------------------------

    /// Insert `bytes` at `pos` in window `id`.
    pub fn add_changes(&mut self, id: WindowId, pos: VirtualPosition, bytes: &[u8]) -> Result<()> {
        let cache = &mut self.cache;
        let window = match self.windows.get_mut(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        window.overlay.add_changes(cache, pos, bytes)?;
        Ok(())
    }

    /// Mark `[start, end)` deleted; returns the new cursor position.
    pub fn remove_characters(
        &mut self,
        id: WindowId,
        start: VirtualPosition,
        end: VirtualPosition,
    ) -> Result<Option<VirtualPosition>> {
        let window = match self.windows.get_mut(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        Ok(window.overlay.remove_characters(start, end)?)
    }

    /// Undo deletion marks in `[start, end)`.
    pub fn undelete(&mut self, id: WindowId, start: VirtualPosition, end: VirtualPosition) -> Result<()> {
        let window = match self.windows.get_mut(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        window.overlay.undelete(start, end)?;
        Ok(())
    }

    /// Next visible position after `pos`.
    pub fn next_position(&self, id: WindowId, pos: VirtualPosition) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.next_position(pos))
    }

    /// Previous visible position before `pos`.
    pub fn prev_position(&self, id: WindowId, pos: VirtualPosition) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.prev_position(pos))
    }

    /// Read up to `max_bytes` visible bytes from `pos`.
    pub fn continuous_chars(
        &mut self,
        id: WindowId,
        pos: VirtualPosition,
        max_bytes: usize,
    ) -> Result<(Vec<u8>, VirtualPosition)> {
        let cache = &mut self.cache;
        let window = match self.windows.get(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        Ok(window.overlay.continuous_chars(cache, pos, max_bytes))
    }

    /// The whole visible document. Save implementations stream this into
    /// the target, then call [`Session::normalize_after_save`].
    pub fn virtual_content(&mut self, id: WindowId) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = VirtualPosition::ZERO;
        loop {
            let (bytes, after) = self.continuous_chars(id, pos, 1 << 20)?;
            if bytes.is_empty() {
                break;
            }
            out.extend_from_slice(&bytes);
            pos = after;
        }
        Ok(out)
    }

    /// Logical byte distance between two positions.
    pub fn diff_bytes(&self, id: WindowId, a: VirtualPosition, b: VirtualPosition) -> Result<u64> {
        Ok(self.window(id)?.overlay.diff_bytes(a, b))
    }

    /// Distance with extra ranges treated as absent.
    pub fn diff_bytes_skipping(
        &self,
        id: WindowId,
        a: VirtualPosition,
        b: VirtualPosition,
        skip: &[VirtualRange],
    ) -> Result<u64> {
        Ok(self.window(id)?.overlay.diff_bytes_skipping(a, b, skip))
    }

    /// `true` if `pos` is inside a deletion range.
    pub fn is_deleted(&self, id: WindowId, pos: VirtualPosition) -> Result<bool> {
        Ok(self.window(id)?.overlay.is_deleted(pos))
    }

    /// Start of the deletion range covering `pos`.
    pub fn deletion_start(&self, id: WindowId, pos: VirtualPosition) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.deletion_start(pos))
    }

    /// End of the deletion range covering `pos`.
    pub fn deletion_end(&self, id: WindowId, pos: VirtualPosition) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.deletion_end(pos))
    }

    /// First visible position of the document.
    pub fn first_valid_position(&self, id: WindowId) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.first_valid_position())
    }

    /// Last visible position of the document.
    pub fn last_valid_position(&self, id: WindowId) -> Result<Option<VirtualPosition>> {
        Ok(self.window(id)?.overlay.last_valid_position())
    }

    /// Bytes pending insertion in this window.
    pub fn inserted_bytes(&self, id: WindowId) -> Result<u64> {
        Ok(self.window(id)?.overlay.inserted_bytes())
    }

    /// Logical bytes marked deleted in this window.
    pub fn deleted_bytes(&self, id: WindowId) -> Result<u64> {
        Ok(self.window(id)?.overlay.deleted_bytes())
    }

    /// `true` once the window has any pending edit (a save is not a
    /// no-op).
    pub fn any_changes_made(&self, id: WindowId) -> Result<bool> {
        Ok(self.window(id)?.overlay.any_changes_made())
    }

    /// `true` when every character is deleted.
    pub fn all_characters_removed(&self, id: WindowId) -> Result<bool> {
        Ok(self.window(id)?.overlay.all_characters_removed())
    }

    /// Clear overlay, cache, and dump state after a save flushed the
    /// window's edits into its backing store.
    pub fn normalize_after_save(&mut self, id: WindowId) -> Result<()> {
        let cache = &mut self.cache;
        let window = match self.windows.get_mut(&id) {
            Some(w) => w,
            None => bail!("unknown window {}", id),
        };
        window.overlay.normalize_after_save(cache)?;
        // The store was rewritten by the save; pick up its new size and
        // timestamp.
        window.overlay.store().reload()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Search `needle` in window `id` from `cursor`.
    pub fn search(
        &mut self,
        id: WindowId,
        needle: &str,
        cursor: VirtualPosition,
        direction: SearchDirection,
        hooks: &SearchHooks<'_>,
    ) -> Result<SearchOutcome> {
        let cache = &mut self.cache;
        let (window, engine) = match (self.windows.get(&id), self.engines.get_mut(&id)) {
            (Some(w), Some(e)) => (w, e),
            _ => bail!("unknown window {}", id),
        };
        Ok(engine.search(&window.overlay, cache, needle, cursor, direction, hooks)?)
    }

    /// Next stored match for `needle` in `direction`.
    pub fn next_match(
        &mut self,
        id: WindowId,
        needle: &str,
        direction: SearchDirection,
        hooks: &SearchHooks<'_>,
    ) -> Result<Option<SearchMatch>> {
        let cache = &mut self.cache;
        let (window, engine) = match (self.windows.get(&id), self.engines.get_mut(&id)) {
            (Some(w), Some(e)) => (w, e),
            _ => bail!("unknown window {}", id),
        };
        Ok(engine.next_match(&window.overlay, cache, needle, direction, hooks)?)
    }

    /// The window's search engine, for introspection in tests and
    /// status displays.
    pub fn search_engine(&self, id: WindowId) -> Result<&SearchEngine> {
        match self.engines.get(&id) {
            Some(e) => Ok(e),
            None => bail!("unknown window {}", id),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn window(&self, id: WindowId) -> Result<&Window> {
        match self.windows.get(&id) {
            Some(w) => Ok(w),
            None => bail!("unknown window {}", id),
        }
    }
}
