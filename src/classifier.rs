use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::error::{FinError, Result};
use crate::matcher::Matcher;
use crate::models::{
    ClassificationRule, ClassificationState, ClassificationSuggestion, CorrectionRecord, Transaction,
};
use crate::ranker::rank;
use crate::store::{ClassificationStore, RuleBook};

pub const RECLASSIFY_REASON: &str = "reclassify";

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub max_suggestions: usize,
    /// Recorded as the actor on correction records.
    pub actor: String,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            max_suggestions: 5,
            actor: "system".to_string(),
        }
    }
}

/// Shared stop signal, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Classified {
        account_code: String,
        pattern: String,
        confidence: f64,
    },
    /// Best candidate scored under the threshold.
    LowConfidence { account_code: String, confidence: f64 },
    NoMatch,
    AlreadyClassified,
    /// A store read or write failed; only this item was abandoned.
    Failed { error: String },
}

impl ItemOutcome {
    pub fn is_classified(&self) -> bool {
        matches!(self, Self::Classified { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::LowConfidence { .. } | Self::NoMatch | Self::AlreadyClassified
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Classified { .. } => "classified",
            Self::LowConfidence { .. } => "low confidence",
            Self::NoMatch => "no match",
            Self::AlreadyClassified => "already classified",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub transaction_id: i64,
    pub description: String,
    /// Account held before this run (only ever set by reclassification).
    pub previous_account_code: Option<String>,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn classified(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_classified()).count()
    }

    pub fn skipped(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_failed()).count()
    }

    pub fn outcome_for(&self, transaction_id: i64) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|i| i.transaction_id == transaction_id)
            .map(|i| &i.outcome)
    }
}

#[derive(Debug, Clone)]
pub struct ManualOutcome {
    pub rule: ClassificationRule,
    pub rule_created: bool,
    pub correction: Option<CorrectionRecord>,
}

fn check_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(FinError::invalid(format!(
            "confidence threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

pub struct Classifier<'s, S: ?Sized> {
    store: &'s S,
    matcher: Matcher,
    options: ClassifyOptions,
}

impl<'s, S: ClassificationStore + ?Sized> Classifier<'s, S> {
    pub fn new(store: &'s S, options: ClassifyOptions) -> Self {
        Self {
            store,
            matcher: Matcher::default(),
            options,
        }
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    fn check_batch_args(&self, threshold: f64) -> Result<()> {
        check_threshold(threshold)?;
        if self.options.max_suggestions == 0 {
            return Err(FinError::invalid("max_suggestions must be greater than zero"));
        }
        Ok(())
    }

    pub fn suggest(
        &self,
        description: &str,
        rules: &[ClassificationRule],
    ) -> Result<Vec<ClassificationSuggestion>> {
        rank(
            self.matcher.find_candidates(description, rules),
            self.options.max_suggestions,
        )
    }

    pub fn suggest_for(&self, transaction_id: i64) -> Result<Vec<ClassificationSuggestion>> {
        let txn = self
            .store
            .load_transaction(transaction_id)?
            .ok_or(FinError::UnknownTransaction(transaction_id))?;
        let book = RuleBook::load(self.store, txn.company_id)?;
        self.suggest(&txn.description, book.rules())
    }

    /// Classify every unclassified transaction of a fiscal period whose best
    /// suggestion reaches `threshold`.
    pub fn auto_classify(
        &self,
        company_id: i64,
        fiscal_period_id: i64,
        threshold: f64,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        self.check_batch_args(threshold)?;
        let mut book = RuleBook::load(self.store, company_id)?;
        let mut transactions = self
            .store
            .load_unclassified_transactions(company_id, fiscal_period_id)?;
        let report = self.run_batch(&mut transactions, &mut book, threshold, cancel, false);
        log::info!(
            "auto-classify company {company_id} period {fiscal_period_id}: {} classified, {} skipped, {} failed",
            report.classified(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Same as [`auto_classify`](Self::auto_classify) over caller-held
    /// transactions and rules. Transactions that already carry an account
    /// are left alone. Every transaction must belong to the book's company.
    pub fn auto_classify_transactions(
        &self,
        transactions: &mut [Transaction],
        book: &mut RuleBook,
        threshold: f64,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        self.check_batch_args(threshold)?;
        if let Some(stray) = transactions.iter().find(|t| t.company_id != book.company_id()) {
            return Err(FinError::invalid(format!(
                "transaction {} belongs to company {}, rules are for company {}",
                stray.id,
                stray.company_id,
                book.company_id()
            )));
        }
        Ok(self.run_batch(transactions, book, threshold, cancel, false))
    }

    /// Clear and re-run classification for every transaction of a fiscal
    /// period. The threshold has no default.
    pub fn reclassify_all(
        &self,
        company_id: i64,
        fiscal_period_id: i64,
        threshold: Option<f64>,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        let threshold = threshold.ok_or_else(|| {
            FinError::invalid("reclassification requires an explicit confidence threshold")
        })?;
        self.check_batch_args(threshold)?;
        let mut book = RuleBook::load(self.store, company_id)?;
        let mut transactions = self.store.load_transactions(company_id, fiscal_period_id)?;
        let report = self.run_batch(&mut transactions, &mut book, threshold, cancel, true);
        log::info!(
            "reclassify company {company_id} period {fiscal_period_id}: {} classified, {} skipped, {} failed",
            report.classified(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    fn run_batch(
        &self,
        transactions: &mut [Transaction],
        book: &mut RuleBook,
        threshold: f64,
        cancel: &CancelFlag,
        reclassify: bool,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for txn in transactions.iter_mut() {
            if cancel.is_cancelled() {
                log::info!("batch cancelled after {} items", report.items.len());
                report.cancelled = true;
                break;
            }
            let previous_account_code = if reclassify { txn.account_code.clone() } else { None };
            let outcome = if reclassify {
                self.reclassify_one(txn, book, threshold)
            } else {
                self.classify_one(txn, book, threshold)
            };
            log::debug!("transaction {}: {}", txn.id, outcome.label());
            report.items.push(ItemReport {
                transaction_id: txn.id,
                description: txn.description.clone(),
                previous_account_code,
                outcome,
            });
        }
        report
    }

    fn classify_one(&self, txn: &mut Transaction, book: &mut RuleBook, threshold: f64) -> ItemOutcome {
        // only unclassified transactions may pick up a suggestion
        if txn.state().transition(ClassificationState::Suggested).is_err() {
            return ItemOutcome::AlreadyClassified;
        }

        let ranked = match self.suggest(&txn.description, book.rules()) {
            Ok(ranked) => ranked,
            Err(e) => return ItemOutcome::Failed { error: e.to_string() },
        };
        let Some(top) = ranked.into_iter().next() else {
            return ItemOutcome::NoMatch;
        };

        if top.confidence < threshold {
            return ItemOutcome::LowConfidence {
                account_code: top.account_code,
                confidence: top.confidence,
            };
        }

        if let Err(e) = self
            .store
            .update_transaction_account(txn.id, Some(&top.account_code))
        {
            log::error!("transaction {}: could not assign {}: {e}", txn.id, top.account_code);
            return ItemOutcome::Failed { error: e.to_string() };
        }
        txn.account_code = Some(top.account_code.clone());

        let pattern = top.matched_rule.pattern().to_string();
        if let Some(rule_id) = top.matched_rule.id {
            if let Err(e) = self.store.increment_rule_usage(rule_id) {
                log::error!("rule {rule_id} '{pattern}': usage count not updated: {e}");
                return ItemOutcome::Failed {
                    error: format!("assigned {} but usage count not updated: {e}", top.account_code),
                };
            }
        }
        book.record_use(&pattern);

        ItemOutcome::Classified {
            account_code: top.account_code,
            pattern,
            confidence: top.confidence,
        }
    }

    fn reclassify_one(&self, txn: &mut Transaction, book: &mut RuleBook, threshold: f64) -> ItemOutcome {
        let previous = txn.account_code.take();
        if previous.is_some() {
            if let Err(e) = self.store.update_transaction_account(txn.id, None) {
                txn.account_code = previous;
                log::error!("transaction {}: could not clear account: {e}", txn.id);
                return ItemOutcome::Failed { error: e.to_string() };
            }
        }

        let outcome = self.classify_one(txn, book, threshold);
        match (&outcome, &previous) {
            (ItemOutcome::Classified { account_code, .. }, Some(prev)) if account_code != prev => {
                let record = CorrectionRecord::new(
                    txn.id,
                    previous.clone(),
                    account_code,
                    RECLASSIFY_REASON,
                    &self.options.actor,
                );
                if let Err(e) = AuditLog::new(self.store).record(&record) {
                    log::error!("transaction {}: correction not recorded: {e}", txn.id);
                    return ItemOutcome::Failed {
                        error: format!("reclassified to {account_code} but correction not recorded: {e}"),
                    };
                }
            }
            (ItemOutcome::Classified { .. }, _) => {}
            (_, Some(prev)) => {
                log::info!(
                    "transaction {}: cleared {prev}, no suggestion reached {threshold}",
                    txn.id
                );
            }
            _ => {}
        }
        outcome
    }

    /// Assign an account chosen by an operator and learn a rule from it.
    pub fn record_manual_classification(
        &self,
        transaction_id: i64,
        account_code: &str,
        account_name: &str,
        source_pattern: &str,
        reason: &str,
    ) -> Result<ManualOutcome> {
        let account_code = account_code.trim();
        if account_code.is_empty() {
            return Err(FinError::invalid("account code must not be empty"));
        }
        // validates the pattern before touching the store
        let fresh = ClassificationRule::new(source_pattern, &[] as &[&str], account_code, account_name)?;

        let txn = self
            .store
            .load_transaction(transaction_id)?
            .ok_or(FinError::UnknownTransaction(transaction_id))?;

        let (mut rule, rule_created) = match self.store.find_rule_by_pattern(txn.company_id, fresh.pattern())? {
            Some(mut existing) => {
                existing.retarget(account_code, account_name);
                existing.record_use();
                (existing, false)
            }
            None => (fresh.with_usage_count(1), true),
        };
        self.store.save_rule(txn.company_id, &mut rule)?;
        self.store
            .update_transaction_account(transaction_id, Some(account_code))?;

        let correction = match txn.account_code {
            Some(prev) if prev != account_code => {
                let mut record = CorrectionRecord::new(
                    transaction_id,
                    Some(prev),
                    account_code,
                    reason,
                    &self.options.actor,
                );
                record.id = Some(AuditLog::new(self.store).record(&record)?);
                Some(record)
            }
            _ => None,
        };

        log::info!(
            "transaction {transaction_id} -> {account_code} ({} rule '{}')",
            if rule_created { "new" } else { "updated" },
            rule.pattern()
        );
        Ok(ManualOutcome {
            rule,
            rule_created,
            correction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::store::tests::{add_txn, seed_scope};
    use crate::store::SqliteStore;

    fn salary_rule(store: &SqliteStore, company: i64) -> ClassificationRule {
        let mut rule = ClassificationRule::new("SALARY PAYMENT", &["SALARY", "PAYMENT"], "8100", "Employee Costs")
            .unwrap()
            .with_usage_count(5);
        store.save_rule(company, &mut rule).unwrap();
        rule
    }

    fn account_of(store: &SqliteStore, txn: i64) -> Option<String> {
        store.load_transaction(txn).unwrap().unwrap().account_code
    }

    fn usage_of(store: &SqliteStore, company: i64, pattern: &str) -> u32 {
        store.find_rule_by_pattern(company, pattern).unwrap().unwrap().usage_count
    }

    fn correction_count(store: &SqliteStore) -> i64 {
        store
            .conn()
            .query_row("SELECT count(*) FROM corrections", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_salary_payment_auto_classified() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "MONTHLY SALARY PAYMENT REF123");

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();

        assert_eq!(report.classified(), 1);
        assert_eq!(report.skipped(), 0);
        assert_eq!(account_of(&store, txn).as_deref(), Some("8100"));
        assert_eq!(usage_of(&store, scope.0, "SALARY PAYMENT"), 6);
        match report.outcome_for(txn).unwrap() {
            ItemOutcome::Classified { confidence, .. } => assert_eq!(*confidence, 1.0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_office_rent_stays_unclassified() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "OFFICE RENT");

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();

        assert_eq!(report.classified(), 0);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.outcome_for(txn), Some(&ItemOutcome::NoMatch));
        assert_eq!(account_of(&store, txn), None);
        assert_eq!(usage_of(&store, scope.0, "SALARY PAYMENT"), 5);
    }

    #[test]
    fn test_below_threshold_never_assigned() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "SALARY ADVANCE");

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();

        assert_eq!(
            report.outcome_for(txn),
            Some(&ItemOutcome::LowConfidence {
                account_code: "8100".to_string(),
                confidence: 0.5
            })
        );
        assert_eq!(account_of(&store, txn), None);

        // exactly at the threshold is enough
        let report = classifier.auto_classify(scope.0, scope.1, 0.5, &CancelFlag::new()).unwrap();
        assert_eq!(report.classified(), 1);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let err = classifier.auto_classify(1, 1, 1.5, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, FinError::InvalidArgument(_)));
        assert!(classifier.auto_classify(1, 1, f64::NAN, &CancelFlag::new()).is_err());
    }

    #[test]
    fn test_auto_classify_is_idempotent() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        add_txn(&store, scope, "SALARY PAYMENT JAN");
        add_txn(&store, scope, "SALARY PAYMENT FEB");

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let first = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();
        assert_eq!(first.classified(), 2);
        assert_eq!(usage_of(&store, scope.0, "SALARY PAYMENT"), 7);

        let second = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();
        assert!(second.items.is_empty());
        assert_eq!(usage_of(&store, scope.0, "SALARY PAYMENT"), 7);
        assert_eq!(correction_count(&store), 0);
    }

    #[test]
    fn test_in_memory_batch_skips_classified() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        let rule = salary_rule(&store, scope.0);
        let a = add_txn(&store, scope, "SALARY PAYMENT");
        let b = add_txn(&store, scope, "SALARY PAYMENT BONUS");
        store.update_transaction_account(b, Some("2000")).unwrap();
        let mut txns = store.load_transactions(scope.0, scope.1).unwrap();
        let mut book = RuleBook::from_rules(scope.0, vec![rule]);

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier
            .auto_classify_transactions(&mut txns, &mut book, 0.8, &CancelFlag::new())
            .unwrap();

        assert_eq!(report.outcome_for(b), Some(&ItemOutcome::AlreadyClassified));
        assert!(report.outcome_for(a).unwrap().is_classified());
        assert_eq!(account_of(&store, b).as_deref(), Some("2000"));
        assert_eq!(txns.iter().find(|t| t.id == a).unwrap().account_code.as_deref(), Some("8100"));
        assert_eq!(book.find("SALARY PAYMENT").unwrap().usage_count, 6);
        assert_eq!(book.version(), 1);
    }

    #[test]
    fn test_reclassify_requires_threshold() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "SALARY PAYMENT");
        store.update_transaction_account(txn, Some("2000")).unwrap();

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let err = classifier.reclassify_all(scope.0, scope.1, None, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, FinError::InvalidArgument(_)));
        // nothing touched
        assert_eq!(account_of(&store, txn).as_deref(), Some("2000"));
    }

    #[test]
    fn test_reclassify_records_changes() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let moved = add_txn(&store, scope, "SALARY PAYMENT");
        let same = add_txn(&store, scope, "SALARY PAYMENT MARCH");
        let cleared = add_txn(&store, scope, "OFFICE RENT");
        store.update_transaction_account(moved, Some("2000")).unwrap();
        store.update_transaction_account(same, Some("8100")).unwrap();
        store.update_transaction_account(cleared, Some("6100")).unwrap();

        let options = ClassifyOptions { actor: "carol".to_string(), ..ClassifyOptions::default() };
        let classifier = Classifier::new(&store, options);
        let report = classifier
            .reclassify_all(scope.0, scope.1, Some(0.8), &CancelFlag::new())
            .unwrap();

        assert_eq!(report.classified(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(account_of(&store, moved).as_deref(), Some("8100"));
        assert_eq!(account_of(&store, cleared), None);

        let history = AuditLog::new(&store).history(moved).to_vec().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_account_code.as_deref(), Some("2000"));
        assert_eq!(history[0].reason, RECLASSIFY_REASON);
        assert_eq!(history[0].actor, "carol");
        assert_eq!(correction_count(&store), 1);
        let item = report.items.iter().find(|i| i.transaction_id == cleared).unwrap();
        assert_eq!(item.previous_account_code.as_deref(), Some("6100"));
    }

    #[test]
    fn test_cancel_stops_before_next_item() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        add_txn(&store, scope, "SALARY PAYMENT");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.items.is_empty());
        assert_eq!(usage_of(&store, scope.0, "SALARY PAYMENT"), 5);
    }

    #[test]
    fn test_manual_first_classification_no_correction() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        let txn = add_txn(&store, scope, "ACME SUPPLIES INV 42");

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let outcome = classifier
            .record_manual_classification(txn, "2000", "Accounts Payable", "acme supplies", "manual")
            .unwrap();

        assert!(outcome.rule_created);
        assert!(outcome.correction.is_none());
        assert_eq!(outcome.rule.usage_count, 1);
        assert_eq!(outcome.rule.keywords(), vec!["ACME", "SUPPLIES"]);
        assert_eq!(account_of(&store, txn).as_deref(), Some("2000"));
        assert_eq!(correction_count(&store), 0);
        assert_eq!(usage_of(&store, scope.0, "ACME SUPPLIES"), 1);
    }

    #[test]
    fn test_manual_reclassification_one_correction() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "SALARY PAYMENT");
        store.update_transaction_account(txn, Some("8100")).unwrap();

        let options = ClassifyOptions { actor: "dave".to_string(), ..ClassifyOptions::default() };
        let classifier = Classifier::new(&store, options);
        let outcome = classifier
            .record_manual_classification(txn, "2000", "Accounts Payable", "SALARY PAYMENT", "wrong account")
            .unwrap();

        assert!(!outcome.rule_created);
        assert_eq!(outcome.rule.account_code, "2000");
        assert_eq!(outcome.rule.usage_count, 6);
        let history: Vec<CorrectionRecord> = AuditLog::new(&store).history(txn).to_vec().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_account_code.as_deref(), Some("8100"));
        assert_eq!(history[0].new_account_code, "2000");
        assert_eq!(history[0].actor, "dave");
        assert_eq!(outcome.correction.unwrap().id, history[0].id);
    }

    #[test]
    fn test_manual_rejects_bad_arguments_before_work() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        let txn = add_txn(&store, scope, "SOMETHING");
        let classifier = Classifier::new(&store, ClassifyOptions::default());

        assert!(matches!(
            classifier.record_manual_classification(txn, " ", "X", "SOMETHING", "manual"),
            Err(FinError::InvalidArgument(_))
        ));
        assert!(matches!(
            classifier.record_manual_classification(txn, "1000", "Cash", "  ", "manual"),
            Err(FinError::InvalidArgument(_))
        ));
        assert!(matches!(
            classifier.record_manual_classification(999, "1000", "Cash", "X", "manual"),
            Err(FinError::UnknownTransaction(999))
        ));
        assert!(store.load_rules_for_company(scope.0).unwrap().is_empty());
    }

    /// Delegates to SQLite. Can refuse to assign one transaction, or raise
    /// a cancel flag once the first assignment has been written.
    struct HookedStore<'a> {
        inner: SqliteStore<'a>,
        broken_txn: Option<i64>,
        cancel_after_write: Option<CancelFlag>,
    }

    impl<'a> HookedStore<'a> {
        fn failing_on(inner: SqliteStore<'a>, txn: i64) -> Self {
            Self { inner, broken_txn: Some(txn), cancel_after_write: None }
        }

        fn cancelling(inner: SqliteStore<'a>, cancel: CancelFlag) -> Self {
            Self { inner, broken_txn: None, cancel_after_write: Some(cancel) }
        }
    }

    impl ClassificationStore for HookedStore<'_> {
        fn load_rules_for_company(&self, company_id: i64) -> Result<Vec<ClassificationRule>> {
            self.inner.load_rules_for_company(company_id)
        }
        fn find_rule_by_pattern(&self, company_id: i64, pattern: &str) -> Result<Option<ClassificationRule>> {
            self.inner.find_rule_by_pattern(company_id, pattern)
        }
        fn save_rule(&self, company_id: i64, rule: &mut ClassificationRule) -> Result<()> {
            self.inner.save_rule(company_id, rule)
        }
        fn increment_rule_usage(&self, rule_id: i64) -> Result<()> {
            self.inner.increment_rule_usage(rule_id)
        }
        fn load_unclassified_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>> {
            self.inner.load_unclassified_transactions(company_id, fiscal_period_id)
        }
        fn load_transactions(&self, company_id: i64, fiscal_period_id: i64) -> Result<Vec<Transaction>> {
            self.inner.load_transactions(company_id, fiscal_period_id)
        }
        fn load_transaction(&self, transaction_id: i64) -> Result<Option<Transaction>> {
            self.inner.load_transaction(transaction_id)
        }
        fn update_transaction_account(&self, transaction_id: i64, account_code: Option<&str>) -> Result<()> {
            if self.broken_txn == Some(transaction_id) {
                return Err(FinError::PersistenceFailure("disk full".to_string()));
            }
            self.inner.update_transaction_account(transaction_id, account_code)?;
            if let Some(cancel) = &self.cancel_after_write {
                cancel.cancel();
            }
            Ok(())
        }
        fn append_correction(&self, record: &CorrectionRecord) -> Result<i64> {
            self.inner.append_correction(record)
        }
        fn load_corrections(&self, transaction_id: i64) -> Result<Vec<CorrectionRecord>> {
            self.inner.load_corrections(transaction_id)
        }
    }

    #[test]
    fn test_write_failure_isolated_to_item() {
        let (_dir, conn) = test_db();
        let sqlite = SqliteStore::new(&conn);
        let scope = seed_scope(&sqlite);
        salary_rule(&sqlite, scope.0);
        let ok_before = add_txn(&sqlite, scope, "SALARY PAYMENT 1");
        let broken = add_txn(&sqlite, scope, "SALARY PAYMENT 2");
        let ok_after = add_txn(&sqlite, scope, "SALARY PAYMENT 3");
        let low = add_txn(&sqlite, scope, "OFFICE RENT");

        let store = HookedStore::failing_on(SqliteStore::new(&conn), broken);
        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();

        assert_eq!(report.items.len(), 4);
        assert_eq!(report.classified(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(report.outcome_for(broken).unwrap().is_failed());
        assert!(report.outcome_for(ok_before).unwrap().is_classified());
        assert!(report.outcome_for(ok_after).unwrap().is_classified());
        assert_eq!(report.outcome_for(low), Some(&ItemOutcome::NoMatch));
        assert_eq!(account_of(&sqlite, broken), None);
        assert_eq!(usage_of(&sqlite, scope.0, "SALARY PAYMENT"), 7);
    }

    #[test]
    fn test_suggest_for_respects_max() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        for (pattern, code) in [("FEE A", "6800"), ("FEE B", "6801"), ("FEE C", "6802")] {
            let mut rule = ClassificationRule::new(pattern, &["FEE"], code, "Bank Charges").unwrap();
            store.save_rule(scope.0, &mut rule).unwrap();
        }
        let txn = add_txn(&store, scope, "WIRE FEE");
        let options = ClassifyOptions { max_suggestions: 2, ..ClassifyOptions::default() };
        let classifier = Classifier::new(&store, options);
        let suggestions = classifier.suggest_for(txn).unwrap();
        let patterns: Vec<&str> = suggestions.iter().map(|s| s.matched_rule.pattern()).collect();
        assert_eq!(patterns, vec!["FEE A", "FEE B"]);
    }

    #[test]
    fn test_cancel_mid_batch_keeps_committed_items() {
        let (_dir, conn) = test_db();
        let sqlite = SqliteStore::new(&conn);
        let scope = seed_scope(&sqlite);
        salary_rule(&sqlite, scope.0);
        let first = add_txn(&sqlite, scope, "SALARY PAYMENT 1");
        let second = add_txn(&sqlite, scope, "SALARY PAYMENT 2");
        let third = add_txn(&sqlite, scope, "SALARY PAYMENT 3");

        let cancel = CancelFlag::new();
        let store = HookedStore::cancelling(SqliteStore::new(&conn), cancel.clone());
        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &cancel).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.items.len(), 1);
        assert!(report.outcome_for(first).unwrap().is_classified());
        assert_eq!(account_of(&sqlite, first).as_deref(), Some("8100"));
        assert_eq!(account_of(&sqlite, second), None);
        assert_eq!(account_of(&sqlite, third), None);
        assert_eq!(usage_of(&sqlite, scope.0, "SALARY PAYMENT"), 6);
    }

    #[test]
    fn test_unreadable_row_does_not_block_batch() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let good = add_txn(&store, scope, "SALARY PAYMENT JAN");
        conn.execute(
            "INSERT INTO transactions (company_id, fiscal_period_id, date, description, amount) \
             VALUES (?1, ?2, '2025-03-15 00:00:00', 'SALARY PAYMENT FEB', -10.0)",
            rusqlite::params![scope.0, scope.1],
        )
        .unwrap();

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();
        assert_eq!(report.classified(), 1);
        assert_eq!(account_of(&store, good).as_deref(), Some("8100"));

        let report = classifier
            .reclassify_all(scope.0, scope.1, Some(0.8), &CancelFlag::new())
            .unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn test_in_memory_batch_rejects_other_company() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        let rule = salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "SALARY PAYMENT");
        let mut txns = store.load_transactions(scope.0, scope.1).unwrap();
        let mut book = RuleBook::from_rules(scope.0 + 1, vec![rule]);

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let err = classifier
            .auto_classify_transactions(&mut txns, &mut book, 0.8, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, FinError::InvalidArgument(_)));
        assert_eq!(account_of(&store, txn), None);
        assert_eq!(book.version(), 0);
    }

    #[test]
    fn test_manual_classification_of_classified_transaction() {
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        let txn = add_txn(&store, scope, "ACME SUPPLIES");
        store.update_transaction_account(txn, Some("2000")).unwrap();

        let classifier = Classifier::new(&store, ClassifyOptions::default());
        let outcome = classifier
            .record_manual_classification(txn, "2000", "Accounts Payable", "ACME SUPPLIES", "manual")
            .unwrap();
        assert!(outcome.correction.is_none());
        assert_eq!(outcome.rule.usage_count, 1);

        // batch runs never touch an already classified transaction
        let mut txns = store.load_transactions(scope.0, scope.1).unwrap();
        let mut book = RuleBook::load(&store, scope.0).unwrap();
        let report = classifier
            .auto_classify_transactions(&mut txns, &mut book, 0.0, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.outcome_for(txn), Some(&ItemOutcome::AlreadyClassified));
        assert_eq!(book.find("ACME SUPPLIES").unwrap().usage_count, 1);
    }

    #[test]
    fn test_custom_scorer_drives_batch() {
        struct Flat;
        impl crate::matcher::Scorer for Flat {
            fn score(&self, _: &str, _: &ClassificationRule) -> f64 {
                0.9
            }
        }
        let (_dir, conn) = test_db();
        let store = SqliteStore::new(&conn);
        let scope = seed_scope(&store);
        salary_rule(&store, scope.0);
        let txn = add_txn(&store, scope, "OFFICE RENT");

        let classifier =
            Classifier::new(&store, ClassifyOptions::default()).with_matcher(Matcher::new(Box::new(Flat)));
        let report = classifier.auto_classify(scope.0, scope.1, 0.8, &CancelFlag::new()).unwrap();
        assert_eq!(report.classified(), 1);
        assert_eq!(account_of(&store, txn).as_deref(), Some("8100"));
    }
}
