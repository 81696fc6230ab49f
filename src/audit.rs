use crate::error::{FinError, Result};
use crate::models::CorrectionRecord;
use crate::store::ClassificationStore;

/// Append-only log of account corrections.
pub struct AuditLog<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: ClassificationStore + ?Sized> AuditLog<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn record(&self, correction: &CorrectionRecord) -> Result<i64> {
        if correction.new_account_code.trim().is_empty() {
            return Err(FinError::invalid("correction needs a new account code"));
        }
        if correction.actor.trim().is_empty() {
            return Err(FinError::invalid("correction needs an actor"));
        }
        let id = self.store.append_correction(correction)?;
        log::info!(
            "transaction {}: {} -> {} by {} ({})",
            correction.transaction_id,
            correction.previous_account_code.as_deref().unwrap_or("-"),
            correction.new_account_code,
            correction.actor,
            correction.reason
        );
        Ok(id)
    }

    pub fn history(&self, transaction_id: i64) -> History<'s, S> {
        History {
            store: self.store,
            transaction_id,
        }
    }
}

/// Correction history of one transaction. Nothing is read until iterated,
/// and each `iter()` starts over from the store.
pub struct History<'s, S: ?Sized> {
    store: &'s S,
    transaction_id: i64,
}

impl<'s, S: ClassificationStore + ?Sized> History<'s, S> {
    pub fn iter(&self) -> HistoryIter<'s, S> {
        HistoryIter {
            store: self.store,
            transaction_id: self.transaction_id,
            records: None,
            done: false,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<CorrectionRecord>> {
        self.iter().collect()
    }
}

impl<'h, 's, S: ClassificationStore + ?Sized> IntoIterator for &'h History<'s, S> {
    type Item = Result<CorrectionRecord>;
    type IntoIter = HistoryIter<'s, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct HistoryIter<'s, S: ?Sized> {
    store: &'s S,
    transaction_id: i64,
    records: Option<std::vec::IntoIter<CorrectionRecord>>,
    done: bool,
}

impl<S: ClassificationStore + ?Sized> Iterator for HistoryIter<'_, S> {
    type Item = Result<CorrectionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.records.is_none() {
            match self.store.load_corrections(self.transaction_id) {
                Ok(records) => self.records = Some(records.into_iter()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        let next = self.records.as_mut().and_then(Iterator::next);
        if next.is_none() {
            self.done = true;
        }
        next.map(Ok)
    }
}
