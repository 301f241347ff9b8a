#![forbid(unsafe_code)]

use super::super::forms::require_form;
use super::super::*;
use super::append::{HEAD_COLUMNS, HEAD_FROM, HeadRow, head_from_row};
use super::read::entry_from_head;
use rusqlite::params;
use std::collections::VecDeque;

const SCAN_BATCH: usize = 256;

type Predicate<'s> = Box<dyn Fn(&Entry) -> bool + 's>;

/// Lazy keyset-paged walk over the live entries of one Form. Finite: it ends
/// once a batch comes back empty. `restart` rewinds to the beginning.
pub struct EntryScan<'s> {
    store: &'s SpaceStore,
    form: Form,
    order: ScanOrder,
    predicate: Option<Predicate<'s>>,
    buffer: VecDeque<Entry>,
    cursor: Option<(i64, String)>,
    exhausted: bool,
}

impl SpaceStore {
    pub fn scan(&self, form: &str, order: ScanOrder) -> Result<EntryScan<'_>, StoreError> {
        let form = self.read(|conn| require_form(conn, form))?;
        Ok(EntryScan {
            store: self,
            form,
            order,
            predicate: None,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        })
    }
}

impl<'s> EntryScan<'s> {
    pub fn with_predicate(mut self, predicate: impl Fn(&Entry) -> bool + 's) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn restart(&mut self) {
        self.buffer.clear();
        self.cursor = None;
        self.exhausted = false;
    }

    fn order_sql(&self) -> (&'static str, &'static str) {
        match self.order {
            ScanOrder::EntryId => ("h.entry_id > ?4", "h.entry_id ASC"),
            ScanOrder::CreatedAt => (
                "(h.created_at_ms > ?3 OR (h.created_at_ms = ?3 AND h.entry_id > ?4))",
                "h.created_at_ms ASC, h.entry_id ASC",
            ),
            ScanOrder::UpdatedAtDesc => (
                "(h.updated_at_ms < ?3 OR (h.updated_at_ms = ?3 AND h.entry_id > ?4))",
                "h.updated_at_ms DESC, h.entry_id ASC",
            ),
        }
    }

    fn cursor_of(&self, head: &HeadRow) -> (i64, String) {
        let rank = match self.order {
            ScanOrder::EntryId => 0,
            ScanOrder::CreatedAt => head.created_at_ms,
            ScanOrder::UpdatedAtDesc => head.updated_at_ms,
        };
        (rank, head.entry_id.clone())
    }

    fn fetch_batch(&self) -> Result<Vec<HeadRow>, StoreError> {
        let (keyset, order) = self.order_sql();
        let limit = to_sqlite_i64(SCAN_BATCH)?;
        self.store.read(|conn| {
            let mut out = Vec::new();
            match &self.cursor {
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {HEAD_COLUMNS} FROM {HEAD_FROM} WHERE h.form_key = ?1 AND h.deleted = 0 ORDER BY {order} LIMIT ?2"
                    ))?;
                    let mut rows = stmt.query(params![self.form.key, limit])?;
                    while let Some(row) = rows.next()? {
                        out.push(head_from_row(row)?);
                    }
                }
                Some((rank, entry_id)) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {HEAD_COLUMNS} FROM {HEAD_FROM} WHERE h.form_key = ?1 AND h.deleted = 0 AND {keyset} ORDER BY {order} LIMIT ?2"
                    ))?;
                    let mut rows = stmt.query(params![self.form.key, limit, rank, entry_id])?;
                    while let Some(row) = rows.next()? {
                        out.push(head_from_row(row)?);
                    }
                }
            }
            Ok(out)
        })
    }

    fn refill(&mut self) -> Result<(), StoreError> {
        while self.buffer.is_empty() && !self.exhausted {
            let batch = self.fetch_batch()?;
            if batch.len() < SCAN_BATCH {
                self.exhausted = true;
            }
            let Some(last) = batch.last() else {
                self.exhausted = true;
                break;
            };
            self.cursor = Some(self.cursor_of(last));
            for head in batch {
                let entry = entry_from_head(head, Some(&self.form));
                let keep = self.predicate.as_ref().is_none_or(|predicate| predicate(&entry));
                if keep {
                    self.buffer.push_back(entry);
                }
            }
        }
        Ok(())
    }
}

impl Iterator for EntryScan<'_> {
    type Item = Result<Entry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.refill() {
            self.exhausted = true;
            self.buffer.clear();
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}
