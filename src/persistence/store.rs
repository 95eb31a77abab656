//! Filesystem-backed deal state store.
//!
//! The active-state directory holds at most one marker per instrument,
//! named `<id>_BUY` or `<id>_SELL`. Markers are created and renamed with
//! atomic `rename(2)` calls so a crash can never leave zero or two of them.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::marker::{
    archive_file_name, marker_file_name, marker_prefix, ArchivedRecord, AuditEntry, AuditEvent,
    DealState, MarkerRecord,
};
use crate::error::DealError;

/// Where the marker behind a handle currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerLocation {
    /// Not created yet; the path is where the Buy marker will go.
    Pending,
    Active,
    Archived,
}

/// Reference to an instrument's marker and the state it records.
#[derive(Debug, Clone)]
pub struct MarkerHandle {
    instrument_id: String,
    path: PathBuf,
    state: DealState,
    location: MarkerLocation,
}

impl MarkerHandle {
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DealState {
        self.state
    }

    pub fn location(&self) -> MarkerLocation {
        self.location
    }
}

/// Summary of a marker in the active-state directory.
#[derive(Debug, Clone)]
pub struct ActiveMarker {
    pub file_name: String,
    pub path: PathBuf,
    pub record: MarkerRecord,
}

/// Reads and mutates per-instrument deal markers.
pub struct DealStateStore {
    active_dir: PathBuf,
}

impl DealStateStore {
    /// Open the store, creating the active-state directory if needed.
    pub fn new<P: AsRef<Path>>(active_dir: P) -> Result<Self, DealError> {
        let active_dir = active_dir.as_ref().to_path_buf();
        fs::create_dir_all(&active_dir).map_err(|e| DealError::fs(&active_dir, e))?;
        info!("Deal state store initialized at {:?}", active_dir);
        Ok(Self { active_dir })
    }

    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    /// Find the persisted step of an instrument.
    ///
    /// Fails with `ConflictingState` when more than one marker matches and
    /// with `CorruptState` when the single marker cannot be interpreted.
    /// Neither case touches the files.
    pub fn resolve_current_state(
        &self,
        instrument_id: &str,
    ) -> Result<(DealState, MarkerHandle), DealError> {
        let matches = self.scan(instrument_id)?;
        match matches.as_slice() {
            [] => {
                let path = self.marker_path(instrument_id, DealState::Buy);
                Ok((
                    DealState::NotStarted,
                    MarkerHandle {
                        instrument_id: instrument_id.to_string(),
                        path,
                        state: DealState::NotStarted,
                        location: MarkerLocation::Pending,
                    },
                ))
            }
            [path] => self.resolve_single(instrument_id, path),
            _ => Err(DealError::ConflictingState {
                instrument_id: instrument_id.to_string(),
                count: matches.len(),
                dir: self.active_dir.clone(),
            }),
        }
    }

    fn scan(&self, instrument_id: &str) -> Result<Vec<PathBuf>, DealError> {
        let prefix = marker_prefix(instrument_id);
        let entries =
            fs::read_dir(&self.active_dir).map_err(|e| DealError::fs(&self.active_dir, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DealError::fs(&self.active_dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(&prefix) {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| DealError::fs(entry.path(), e))?;
            if file_type.is_file() {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    fn resolve_single(
        &self,
        instrument_id: &str,
        path: &Path,
    ) -> Result<(DealState, MarkerHandle), DealError> {
        let corrupt = |reason: String| DealError::CorruptState {
            instrument_id: instrument_id.to_string(),
            reason,
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let tag = &name[marker_prefix(instrument_id).len()..];
        let tagged = match DealState::from_tag(tag) {
            Some(state @ (DealState::Buy | DealState::Sell)) => state,
            _ => return Err(corrupt(format!("unrecognized state tag '{tag}' in {name}"))),
        };

        let record = read_record(path)?;
        let state = match record.last_state() {
            Some(recorded) if recorded == tagged => recorded,
            // The record is written before the rename, so it may be one step ahead.
            Some(recorded) if tagged.next() == Some(recorded) => {
                warn!(
                    instrument = %instrument_id,
                    tagged = %tagged,
                    recorded = %recorded,
                    "Marker name lags its record, resuming from the record"
                );
                recorded
            }
            Some(recorded) => {
                return Err(corrupt(format!(
                    "{name} records state {recorded} which cannot follow {tagged}"
                )))
            }
            None => {
                debug!(
                    instrument = %instrument_id,
                    unreadable_lines = record.unreadable_lines,
                    "No structured transition in marker, using file name tag"
                );
                tagged
            }
        };

        Ok((
            state,
            MarkerHandle {
                instrument_id: instrument_id.to_string(),
                path: path.to_path_buf(),
                state,
                location: MarkerLocation::Active,
            },
        ))
    }

    /// Move the deal one step forward.
    ///
    /// `NotStarted -> Buy` creates the marker, `Buy -> Sell` renames it.
    /// `Sell -> Profit` goes through [`DealStateStore::archive`].
    pub fn transition(&self, handle: &mut MarkerHandle, to: DealState) -> Result<(), DealError> {
        let from = handle.state;
        let entry = AuditEntry::now(AuditEvent::Transition { from, to });

        match (from, to) {
            (DealState::NotStarted, DealState::Buy) => {
                let target = self.marker_path(&handle.instrument_id, DealState::Buy);
                let staging = self
                    .active_dir
                    .join(format!(".{}_BUY.tmp", handle.instrument_id));
                write_new(&staging, &entry)?;
                fs::rename(&staging, &target).map_err(|e| DealError::fs(&target, e))?;
                handle.path = target;
                handle.location = MarkerLocation::Active;
            }
            (DealState::Buy, DealState::Sell) => {
                self.append_entry(handle, &entry)?;
                let target = self.marker_path(&handle.instrument_id, DealState::Sell);
                if handle.path != target {
                    fs::rename(&handle.path, &target).map_err(|e| DealError::fs(&target, e))?;
                    handle.path = target;
                }
            }
            _ => {
                return Err(DealError::InvalidTransition {
                    instrument_id: handle.instrument_id.clone(),
                    from,
                    to,
                })
            }
        }

        handle.state = to;
        debug!(instrument = %handle.instrument_id, %from, %to, path = ?handle.path, "Marker transitioned");
        Ok(())
    }

    /// Append one audit event to the instrument's marker.
    pub fn append(&self, handle: &MarkerHandle, event: AuditEvent) -> Result<(), DealError> {
        self.append_entry(handle, &AuditEntry::now(event))
    }

    fn append_entry(&self, handle: &MarkerHandle, entry: &AuditEntry) -> Result<(), DealError> {
        if handle.location == MarkerLocation::Pending {
            return Err(DealError::fs(
                &handle.path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "marker not created yet"),
            ));
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&handle.path)
            .map_err(|e| DealError::fs(&handle.path, e))?;
        file.write_all(encode_line(entry)?.as_bytes())
            .map_err(|e| DealError::fs(&handle.path, e))
    }

    /// Finish the deal: record `Profit` and move the marker into `archive_dir`.
    ///
    /// Accepts a handle in `Sell`, or one that already recorded `Profit` but
    /// was not moved before a crash.
    pub fn archive(
        &self,
        handle: &mut MarkerHandle,
        archive_dir: &Path,
        completed_at: DateTime<Utc>,
    ) -> Result<ArchivedRecord, DealError> {
        match (handle.state, handle.location) {
            (DealState::Sell, MarkerLocation::Active) => {
                let entry = AuditEntry {
                    at: completed_at,
                    event: AuditEvent::Transition {
                        from: DealState::Sell,
                        to: DealState::Profit,
                    },
                };
                self.append_entry(handle, &entry)?;
            }
            (DealState::Profit, MarkerLocation::Active) => {}
            (from, _) => {
                return Err(DealError::InvalidTransition {
                    instrument_id: handle.instrument_id.clone(),
                    from,
                    to: DealState::Profit,
                })
            }
        }

        fs::create_dir_all(archive_dir).map_err(|e| DealError::fs(archive_dir, e))?;
        let target = archive_dir.join(archive_file_name(&handle.instrument_id, completed_at));
        fs::rename(&handle.path, &target).map_err(|e| DealError::fs(&target, e))?;

        handle.path = target.clone();
        handle.state = DealState::Profit;
        handle.location = MarkerLocation::Archived;
        info!(instrument = %handle.instrument_id, path = ?target, "Deal archived");

        Ok(ArchivedRecord {
            instrument_id: handle.instrument_id.clone(),
            completed_at,
            path: target,
        })
    }

    /// Read the audit log behind a handle.
    pub fn read(&self, handle: &MarkerHandle) -> Result<MarkerRecord, DealError> {
        if handle.location == MarkerLocation::Pending {
            return Ok(MarkerRecord::default());
        }
        read_record(&handle.path)
    }

    /// All markers in the active-state directory, sorted by name.
    pub fn list_active(&self) -> Result<Vec<ActiveMarker>, DealError> {
        let mut markers = Vec::new();
        for path in list_files(&self.active_dir)? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            markers.push(ActiveMarker {
                file_name: file_name.to_string(),
                record: read_record(&path)?,
                path,
            });
        }
        Ok(markers)
    }

    /// All archived records in `archive_dir`, oldest first.
    pub fn list_archived(archive_dir: &Path) -> Result<Vec<ArchivedRecord>, DealError> {
        if !archive_dir.exists() {
            return Ok(Vec::new());
        }
        let mut records: Vec<ArchivedRecord> = list_files(archive_dir)?
            .iter()
            .filter_map(|path| ArchivedRecord::from_path(path))
            .collect();
        records.sort_by_key(|r| r.completed_at);
        Ok(records)
    }

    fn marker_path(&self, instrument_id: &str, state: DealState) -> PathBuf {
        let name = marker_file_name(instrument_id, state)
            .unwrap_or_else(|| marker_prefix(instrument_id));
        self.active_dir.join(name)
    }
}

/// Read and parse a marker file.
pub fn read_record(path: &Path) -> Result<MarkerRecord, DealError> {
    let content = fs::read_to_string(path).map_err(|e| DealError::fs(path, e))?;
    Ok(MarkerRecord::parse(&content))
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, DealError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DealError::fs(dir, e))? {
        let entry = entry.map_err(|e| DealError::fs(dir, e))?;
        if entry.file_type().map_err(|e| DealError::fs(entry.path(), e))?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn encode_line(entry: &AuditEntry) -> Result<String, DealError> {
    let mut line = serde_json::to_string(entry)
        .map_err(|e| DealError::fs("<audit entry>", std::io::Error::from(e)))?;
    line.push('\n');
    Ok(line)
}

fn write_new(path: &Path, entry: &AuditEntry) -> Result<(), DealError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| DealError::fs(path, e))?;
    file.write_all(encode_line(entry)?.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| DealError::fs(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DealStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DealStateStore::new(dir.path().join("current")).unwrap();
        (dir, store)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_unknown_instrument_is_not_started() {
        let (_dir, store) = setup();
        fs::write(store.active_dir().join("OTHER_BUY"), "").unwrap();
        // Prefix match requires the separator, so "FIG" does not claim "FIGI_BUY".
        fs::write(store.active_dir().join("FIGI_BUY"), "").unwrap();

        let (state, handle) = store.resolve_current_state("FIG").unwrap();
        assert_eq!(state, DealState::NotStarted);
        assert_eq!(handle.location(), MarkerLocation::Pending);
        assert_eq!(handle.path(), store.active_dir().join("FIG_BUY"));
        assert!(!handle.path().exists());
    }

    #[test]
    fn test_start_creates_exactly_one_buy_marker() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();

        store.transition(&mut handle, DealState::Buy).unwrap();

        assert_eq!(entries(store.active_dir()), vec!["FIGI_BUY".to_string()]);
        let (state, resolved) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(state, DealState::Buy);
        assert_eq!(resolved.path(), handle.path());

        let record = store.read(&resolved).unwrap();
        assert_eq!(record.last_state(), Some(DealState::Buy));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();

        let (first_state, first) = store.resolve_current_state("FIGI").unwrap();
        let (second_state, second) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(first_state, second_state);
        assert_eq!(first.path(), second.path());
        assert_eq!(entries(store.active_dir()), vec!["FIGI_BUY".to_string()]);
    }

    #[test]
    fn test_buy_to_sell_renames_and_keeps_history() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();
        store
            .append(&handle, AuditEvent::Quote { price: dec!(9.5) })
            .unwrap();

        store.transition(&mut handle, DealState::Sell).unwrap();

        assert_eq!(entries(store.active_dir()), vec!["FIGI_SELL".to_string()]);
        let (state, resolved) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(state, DealState::Sell);
        let record = store.read(&resolved).unwrap();
        assert_eq!(record.quote_count(), 1);
        assert_eq!(record.entries.len(), 3);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();

        let err = store.transition(&mut handle, DealState::Sell).unwrap_err();
        assert!(matches!(err, DealError::InvalidTransition { .. }));
        assert!(entries(store.active_dir()).is_empty());
    }

    #[test]
    fn test_conflicting_markers_are_left_untouched() {
        let (_dir, store) = setup();
        let buy = store.active_dir().join("FIGI_BUY");
        let sell = store.active_dir().join("FIGI_SELL");
        fs::write(&buy, "buy history\n").unwrap();
        fs::write(&sell, "sell history\n").unwrap();

        let err = store.resolve_current_state("FIGI").unwrap_err();
        assert!(matches!(err, DealError::ConflictingState { count: 2, .. }));

        assert_eq!(fs::read_to_string(&buy).unwrap(), "buy history\n");
        assert_eq!(fs::read_to_string(&sell).unwrap(), "sell history\n");
    }

    #[test]
    fn test_unrecognized_tag_is_corrupt() {
        let (_dir, store) = setup();
        fs::write(store.active_dir().join("FIGI_HOLD"), "").unwrap();

        let err = store.resolve_current_state("FIGI").unwrap_err();
        assert!(matches!(err, DealError::CorruptState { .. }));
    }

    #[test]
    fn test_legacy_marker_falls_back_to_tag() {
        let (_dir, store) = setup();
        fs::write(
            store.active_dir().join("FIGI_SELL"),
            "101.2\nGot price bellow target: 100.0\n",
        )
        .unwrap();

        let (state, handle) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(state, DealState::Sell);
        assert_eq!(handle.location(), MarkerLocation::Active);
    }

    #[test]
    fn test_record_ahead_of_name_wins() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();
        // Simulate a crash after the transition line was written but before the rename.
        store
            .append(
                &handle,
                AuditEvent::Transition {
                    from: DealState::Buy,
                    to: DealState::Sell,
                },
            )
            .unwrap();

        let (state, handle) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(state, DealState::Sell);
        assert!(handle.path().ends_with("FIGI_BUY"));
    }

    #[test]
    fn test_record_behind_name_is_corrupt() {
        let (_dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();
        // The record still says BUY while the name claims SELL.
        fs::rename(handle.path(), store.active_dir().join("FIGI_SELL")).unwrap();

        let err = store.resolve_current_state("FIGI").unwrap_err();
        assert!(matches!(err, DealError::CorruptState { .. }));
    }

    #[test]
    fn test_archive_moves_marker_out_of_active_dir() {
        let (dir, store) = setup();
        let archive_dir = dir.path().join("archive");
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();
        store.transition(&mut handle, DealState::Sell).unwrap();

        let completed_at = Utc::now();
        let archived = store
            .archive(&mut handle, &archive_dir, completed_at)
            .unwrap();

        assert!(entries(store.active_dir()).is_empty());
        let archived_names = entries(&archive_dir);
        assert_eq!(archived_names.len(), 1);
        assert!(archived_names[0].starts_with("FIGI_PROFIT_"));

        let parsed = ArchivedRecord::from_path(&archive_dir.join(&archived_names[0])).unwrap();
        assert_eq!(parsed.instrument_id, "FIGI");
        assert_eq!(
            parsed.completed_at.timestamp_millis(),
            completed_at.timestamp_millis()
        );
        assert_eq!(archived.path, parsed.path);
        assert_eq!(handle.location(), MarkerLocation::Archived);

        let (state, _) = store.resolve_current_state("FIGI").unwrap();
        assert_eq!(state, DealState::NotStarted);
        assert_eq!(
            read_record(&archived.path).unwrap().last_state(),
            Some(DealState::Profit)
        );
    }

    #[test]
    fn test_archive_requires_sell_state() {
        let (dir, store) = setup();
        let (_, mut handle) = store.resolve_current_state("FIGI").unwrap();
        store.transition(&mut handle, DealState::Buy).unwrap();

        let err = store
            .archive(&mut handle, &dir.path().join("archive"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DealError::InvalidTransition { .. }));
        assert_eq!(entries(store.active_dir()), vec!["FIGI_BUY".to_string()]);
    }

    #[test]
    fn test_append_to_missing_marker_fails() {
        let (_dir, store) = setup();
        let (_, handle) = store.resolve_current_state("FIGI").unwrap();

        let err = store
            .append(&handle, AuditEvent::Quote { price: dec!(1) })
            .unwrap_err();
        assert!(matches!(err, DealError::Filesystem { .. }));
    }

    #[test]
    fn test_listings() {
        let (dir, store) = setup();
        let archive_dir = dir.path().join("archive");
        assert!(DealStateStore::list_archived(&archive_dir).unwrap().is_empty());

        for id in ["AAA", "BBB"] {
            let (_, mut handle) = store.resolve_current_state(id).unwrap();
            store.transition(&mut handle, DealState::Buy).unwrap();
        }
        let (_, mut handle) = store.resolve_current_state("AAA").unwrap();
        store.transition(&mut handle, DealState::Sell).unwrap();
        store.archive(&mut handle, &archive_dir, Utc::now()).unwrap();

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].file_name, "BBB_BUY");

        let archived = DealStateStore::list_archived(&archive_dir).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].instrument_id, "AAA");
    }
}
