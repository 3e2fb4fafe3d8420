//! Persistence seam
//!
//! A [`Store`] hands out one [`UnitOfWork`] per subject. Everything written
//! for that subject goes through the unit and becomes visible on
//! [`commit`](UnitOfWork::commit), or not at all.

use async_trait::async_trait;
use eden_common::EntityRecord;

use crate::error::{IngestError, StoreError};
use crate::reconcile::{Patch, ReconcileSpec};
use crate::schema::{Dataset, Target};

pub mod postgres;

pub use postgres::{PgStore, PgUnitOfWork};

/// How rows of a table are tied to the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The subject row itself, found by symbol
    Symbol,
    /// Child rows referencing the subject through `company_id`
    Company,
}

/// One target resolved to its table and reconciliation spec
#[derive(Debug, Clone, Copy)]
pub struct DatasetTable {
    pub target: Target,
    pub table: &'static str,
    pub spec: &'static ReconcileSpec,
}

impl DatasetTable {
    pub fn resolve(target: Target) -> Result<Self, IngestError> {
        let table = target
            .table()
            .ok_or_else(|| StoreError::NoTable(target.to_string()))?;
        Ok(Self {
            target,
            table,
            spec: target.dataset.spec()?,
        })
    }

    pub fn scope(&self) -> Scope {
        if self.target.dataset == Dataset::Profile {
            Scope::Symbol
        } else {
            Scope::Company
        }
    }
}

/// Opens per-subject units of work
#[async_trait]
pub trait Store: Send + Sync {
    type Unit: UnitOfWork;

    /// Start a unit of work for `ticker`, creating the subject row if missing
    async fn begin(&self, ticker: &str) -> Result<Self::Unit, StoreError>;
}

/// All reads and writes for one subject, applied atomically
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Persisted records of the subject in `table`
    async fn read_existing(&mut self, table: &DatasetTable) -> Result<Vec<EntityRecord>, StoreError>;

    /// Insert new records; returns the number of rows written
    async fn insert_many(
        &mut self,
        table: &DatasetTable,
        records: &[EntityRecord],
    ) -> Result<u64, StoreError>;

    /// Apply field-level patches; returns the number of rows touched
    async fn apply_patches(&mut self, table: &DatasetTable, patches: &[Patch])
        -> Result<u64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::Period;

    #[test]
    fn test_resolve_targets() {
        let table =
            DatasetTable::resolve(Target::new(Dataset::CashFlowStatement, Some(Period::Quarter)))
                .unwrap();
        assert_eq!(table.table, "cash_flow_statement_quarter");
        assert_eq!(table.scope(), Scope::Company);

        let profile = DatasetTable::resolve(Target::new(Dataset::Profile, None)).unwrap();
        assert_eq!(profile.scope(), Scope::Symbol);

        let err = DatasetTable::resolve(Target::new(Dataset::EnterpriseValues, Some(Period::Quarter)))
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::NoTable(_))));
    }
}
