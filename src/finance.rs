use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::model::{Expense, FinancialEvent, MonthKey, PaymentStatus};
use crate::money::Money;

/// Monthly fee owed by each student, in student listing order.
///
/// A student without a class owes nothing.
#[derive(Debug, Clone, Default)]
pub struct FeeTable {
    entries: Vec<(String, Money)>,
    by_student: HashMap<String, usize>,
}

impl FeeTable {
    /// A repeated student id keeps its first position and its last fee.
    pub fn new(entries: Vec<(String, Money)>) -> Self {
        let mut table = FeeTable::default();
        for (id, fee) in entries {
            match table.by_student.get(&id).copied() {
                Some(pos) => table.entries[pos].1 = fee,
                None => {
                    table.by_student.insert(id.clone(), table.entries.len());
                    table.entries.push((id, fee));
                }
            }
        }
        table
    }

    pub fn fee(&self, student_id: &str) -> Option<Money> {
        self.by_student
            .get(student_id)
            .map(|&pos| self.entries[pos].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Money)> {
        self.entries.iter().map(|(id, fee)| (id.as_str(), *fee))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTotals {
    pub month: MonthKey,
    pub expected: Money,
    pub actual: Money,
    pub expenses: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub month: MonthKey,
    pub expected: Money,
    pub income: Money,
    pub pending: Money,
    pub expenses: Money,
    pub net: Money,
}

#[derive(Debug, Default)]
pub struct FinancialIndex {
    by_month: BTreeMap<MonthKey, HashMap<String, PaymentStatus>>,
    expenses: Vec<Expense>,
}

impl FinancialIndex {
    pub fn rebuild<'a>(
        events: impl IntoIterator<Item = &'a FinancialEvent>,
        expenses: impl IntoIterator<Item = &'a Expense>,
    ) -> Self {
        let mut idx = FinancialIndex::default();
        for e in events {
            idx.set_status(e.month, &e.student_id, e.status);
        }
        idx.expenses = expenses.into_iter().cloned().collect();
        idx
    }

    pub fn set_status(&mut self, month: MonthKey, student_id: &str, status: PaymentStatus) {
        self.by_month
            .entry(month)
            .or_default()
            .insert(student_id.to_string(), status);
    }

    pub fn bulk_set_statuses<'a>(
        &mut self,
        month: MonthKey,
        statuses: impl IntoIterator<Item = (&'a str, PaymentStatus)>,
    ) {
        let m = self.by_month.entry(month).or_default();
        for (student_id, status) in statuses {
            m.insert(student_id.to_string(), status);
        }
    }

    pub fn status(&self, month: MonthKey, student_id: &str) -> Option<PaymentStatus> {
        self.by_month
            .get(&month)
            .and_then(|m| m.get(student_id))
            .copied()
    }

    pub fn remove_student(&mut self, student_id: &str) {
        for m in self.by_month.values_mut() {
            m.remove(student_id);
        }
        self.by_month.retain(|_, m| !m.is_empty());
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn add_expense(&mut self, expense: Expense) {
        self.expenses.push(expense);
    }

    pub fn remove_expense(&mut self, id: &str) -> Option<Expense> {
        let pos = self.expenses.iter().position(|e| e.id == id)?;
        Some(self.expenses.remove(pos))
    }

    pub fn expected_amount(&self, month: MonthKey, student_id: &str, fees: &FeeTable) -> Money {
        match self.status(month, student_id) {
            Some(PaymentStatus::Exempt) => Money::ZERO,
            _ => fees.fee(student_id).unwrap_or(Money::ZERO),
        }
    }

    pub fn expected_income(&self, month: MonthKey, fees: &FeeTable) -> Money {
        fees.iter()
            .map(|(id, _)| self.expected_amount(month, id, fees))
            .sum()
    }

    pub fn actual_income(&self, month: MonthKey, fees: &FeeTable) -> Money {
        fees.iter()
            .filter(|(id, _)| self.status(month, id) == Some(PaymentStatus::Paid))
            .map(|(_, fee)| fee)
            .sum()
    }

    /// Fees still owed: status pending or never recorded.
    pub fn pending_amount(&self, month: MonthKey, fees: &FeeTable) -> Money {
        fees.iter()
            .filter(|(id, _)| {
                matches!(self.status(month, id), None | Some(PaymentStatus::Pending))
            })
            .map(|(_, fee)| fee)
            .sum()
    }

    pub fn total_expenses(&self, month: MonthKey) -> Money {
        self.expenses
            .iter()
            .filter(|e| month.contains(e.date))
            .map(|e| e.amount)
            .sum()
    }

    pub fn net_balance(&self, month: MonthKey, fees: &FeeTable) -> Money {
        self.actual_income(month, fees) - self.total_expenses(month)
    }

    pub fn summary(&self, month: MonthKey, fees: &FeeTable) -> MonthSummary {
        MonthSummary {
            month,
            expected: self.expected_income(month, fees),
            income: self.actual_income(month, fees),
            pending: self.pending_amount(month, fees),
            expenses: self.total_expenses(month),
            net: self.net_balance(month, fees),
        }
    }

    /// `{expected, actual, expenses}` for the `months` months ending at `now`, oldest first.
    pub fn trailing_series(&self, months: usize, now: MonthKey, fees: &FeeTable) -> Vec<MonthlyTotals> {
        now.trailing(months)
            .into_iter()
            .map(|month| MonthlyTotals {
                month,
                expected: self.expected_income(month, fees),
                actual: self.actual_income(month, fees),
                expenses: self.total_expenses(month),
            })
            .collect()
    }
}
