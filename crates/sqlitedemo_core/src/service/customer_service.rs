//! Customer use-case service: the mutation orchestrator.
//!
//! # Responsibility
//! - Run every mutation through one fixed protocol:
//!   validate, check existence, lock the key, open a transaction, execute,
//!   verify the affected-row count, commit, read back, release the key.
//! - Route every failure through `classify` exactly once.
//!
//! # Invariants
//! - Validation and existence failures never touch the lock table.
//! - A held key is released on every exit path, including future drop.
//! - A transaction is committed only after exactly one row was affected;
//!   any other exit rolls it back.
//! - The storage call runs under the transaction's remaining timeout, so a
//!   stalled call cannot keep the connection past it.
//! - Reads take no lock and open no transaction.

use crate::db::transaction::{Transaction, TransactionCoordinator};
use crate::model::customer::{
    validate_customer_id, Customer, CustomerDeleted, CustomerFilter, CustomerPatch,
};
use crate::repo::customer_repo::{CustomerRepository, RepoError, RepoResult};
use crate::service::error::{classify, OperationError, ServiceResult};
use crate::service::lock_table::{EntityLockTable, LockLease, OperationKind};
use crate::service::recorder::{LogProperties, LogRecorder, LogSnapshot};
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const SERVICE_TYPE_NAME: &str = "CustomerService";

/// Storage call executed inside the operation's transaction.
#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    Insert(&'a Customer),
    Update(&'a str, &'a CustomerPatch),
    Delete(&'a str),
}

impl Mutation<'_> {
    fn kind(&self) -> OperationKind {
        match self {
            Self::Insert(_) => OperationKind::Add,
            Self::Update(..) => OperationKind::Update,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::Insert(customer) => customer.customer_id.as_str(),
            Self::Update(key, _) | Self::Delete(key) => *key,
        }
    }
}

/// Log context of one service call.
struct OperationCall {
    operation: &'static str,
    id: Uuid,
    started_at: Instant,
    properties: LogProperties,
}

impl OperationCall {
    fn new(operation: &'static str, snapshot: LogProperties) -> Self {
        let id = Uuid::new_v4();
        let mut properties = snapshot;
        properties.insert("Operation".to_string(), operation.to_string());
        properties.insert("OperationId".to_string(), id.to_string());
        properties.insert("_TypeName".to_string(), SERVICE_TYPE_NAME.to_string());
        Self {
            operation,
            id,
            started_at: Instant::now(),
            properties,
        }
    }
}

/// Customer service over a repository, a shared lock table and a
/// transaction coordinator.
pub struct CustomerService<R: CustomerRepository> {
    repo: R,
    locks: Arc<EntityLockTable>,
    transactions: TransactionCoordinator,
    recorder: Arc<dyn LogRecorder>,
}

impl<R: CustomerRepository> CustomerService<R> {
    /// Creates a service. `locks` must be the one table shared by every
    /// service mutating the same store.
    pub fn new(
        repo: R,
        locks: Arc<EntityLockTable>,
        transactions: TransactionCoordinator,
        recorder: Arc<dyn LogRecorder>,
    ) -> Self {
        Self {
            repo,
            locks,
            transactions,
            recorder,
        }
    }

    pub fn lock_table(&self) -> &EntityLockTable {
        &self.locks
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Timeout applied to every transaction this service opens.
    pub fn default_timeout(&self) -> Duration {
        self.transactions.default_options().timeout
    }

    /// Lists customers matching `filter`. No lock, no transaction.
    pub async fn get_customers(&self, filter: &CustomerFilter) -> ServiceResult<Vec<Customer>> {
        let call = OperationCall::new("get_customers", filter.snapshot());
        let result = self
            .repo
            .query(filter, None)
            .await
            .map_err(|err| OperationError::from(err).context("query customers"));
        self.finish(result, &call)
    }

    /// Gets one customer by key; `None` when absent.
    pub async fn get_customer(&self, key: &str) -> ServiceResult<Option<Customer>> {
        let call = OperationCall::new("get_customer", key.snapshot());
        let result = self.try_get_customer(key).await;
        self.finish(result, &call)
    }

    /// Creates a customer in its own transaction and returns the stored row.
    ///
    /// # Errors
    /// - `Validation` for an empty key or empty company name.
    /// - `Conflict` when the key already exists.
    /// - `LockConflict` when another mutation holds the key.
    /// - `Storage` when the insert did not affect exactly one row.
    /// - `Transaction(TimedOut)` when the connection or the insert outlasted
    ///   the transaction timeout.
    pub async fn create_customer(&self, customer: &Customer) -> ServiceResult<Customer> {
        self.create_customer_within(customer, None).await
    }

    /// Creates a customer inside the caller's transaction; the caller commits.
    pub async fn create_customer_in(
        &self,
        customer: &Customer,
        ambient: &mut Transaction,
    ) -> ServiceResult<Customer> {
        self.create_customer_within(customer, Some(ambient)).await
    }

    /// Replaces every non-key column of `key` and returns the stored row.
    ///
    /// # Errors
    /// - `Validation` for an empty key or empty company name.
    /// - `NotFound` / `AmbiguousState` when the key does not match one row.
    /// - `LockConflict` when another mutation holds the key.
    /// - `Storage` when the update did not affect exactly one row.
    pub async fn update_customer(
        &self,
        key: &str,
        patch: &CustomerPatch,
    ) -> ServiceResult<Customer> {
        self.update_customer_within(key, patch, None).await
    }

    /// Updates a customer inside the caller's transaction; the caller commits.
    pub async fn update_customer_in(
        &self,
        key: &str,
        patch: &CustomerPatch,
        ambient: &mut Transaction,
    ) -> ServiceResult<Customer> {
        self.update_customer_within(key, patch, Some(ambient)).await
    }

    /// Deletes `key` and acknowledges it.
    ///
    /// # Errors
    /// - `NotFound` / `AmbiguousState` when the key does not match one row.
    /// - `LockConflict` when another mutation holds the key.
    /// - `Storage` when the delete did not affect exactly one row.
    pub async fn delete_customer(&self, key: &str) -> ServiceResult<CustomerDeleted> {
        self.delete_customer_within(key, None).await
    }

    /// Deletes a customer inside the caller's transaction; the caller commits.
    pub async fn delete_customer_in(
        &self,
        key: &str,
        ambient: &mut Transaction,
    ) -> ServiceResult<CustomerDeleted> {
        self.delete_customer_within(key, Some(ambient)).await
    }

    async fn create_customer_within(
        &self,
        customer: &Customer,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<Customer> {
        let call = OperationCall::new(OperationKind::Add.as_str(), customer.snapshot());
        let result = self.try_create(customer, ambient, &call).await;
        self.finish(result, &call)
    }

    async fn update_customer_within(
        &self,
        key: &str,
        patch: &CustomerPatch,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<Customer> {
        let mut snapshot = patch.snapshot();
        snapshot.insert("CustomerID".to_string(), key.to_string());
        let call = OperationCall::new(OperationKind::Update.as_str(), snapshot);
        let result = self.try_update(key, patch, ambient, &call).await;
        self.finish(result, &call)
    }

    async fn delete_customer_within(
        &self,
        key: &str,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<CustomerDeleted> {
        let call = OperationCall::new(OperationKind::Delete.as_str(), key.snapshot());
        let result = self.try_delete(key, ambient, &call).await;
        self.finish(result, &call)
    }

    async fn try_get_customer(&self, key: &str) -> ServiceResult<Option<Customer>> {
        let mut rows = self
            .repo
            .query(&CustomerFilter::by_id(key), None)
            .await
            .map_err(|err| OperationError::from(err).context("query customer"))?;
        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            matches => Err(OperationError::AmbiguousState {
                key: key.to_string(),
                matches,
            }),
        }
    }

    async fn try_create(
        &self,
        customer: &Customer,
        mut ambient: Option<&mut Transaction>,
        call: &OperationCall,
    ) -> ServiceResult<Customer> {
        customer.validate()?;
        let key = customer.customer_id.as_str();

        let existing = self.count_matches(key, ambient.as_deref_mut()).await?;
        if existing > 0 {
            return Err(OperationError::Conflict {
                key: key.to_string(),
            });
        }

        let _lease = self.acquire(key, OperationKind::Add)?;
        self.recorder.write_with("insert customer", &call.properties);
        self.execute(Mutation::Insert(customer), ambient.as_deref_mut())
            .await?;
        self.read_back(key, ambient).await
    }

    async fn try_update(
        &self,
        key: &str,
        patch: &CustomerPatch,
        mut ambient: Option<&mut Transaction>,
        call: &OperationCall,
    ) -> ServiceResult<Customer> {
        validate_customer_id(key)?;
        patch.validate()?;

        self.expect_single(key, ambient.as_deref_mut()).await?;

        let _lease = self.acquire(key, OperationKind::Update)?;
        self.recorder.write_with("update customer", &call.properties);
        self.execute(Mutation::Update(key, patch), ambient.as_deref_mut())
            .await?;
        self.read_back(key, ambient).await
    }

    async fn try_delete(
        &self,
        key: &str,
        mut ambient: Option<&mut Transaction>,
        call: &OperationCall,
    ) -> ServiceResult<CustomerDeleted> {
        self.expect_single(key, ambient.as_deref_mut()).await?;

        let _lease = self.acquire(key, OperationKind::Delete)?;
        self.recorder.write_with("delete customer", &call.properties);
        self.execute(Mutation::Delete(key), ambient).await?;
        Ok(CustomerDeleted {
            customer_id: key.to_string(),
            deleted: true,
        })
    }

    async fn count_matches(
        &self,
        key: &str,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<usize> {
        let rows = self
            .repo
            .query(&CustomerFilter::by_id(key), ambient)
            .await
            .map_err(|err| OperationError::from(err).context("check existence"))?;
        Ok(rows.len())
    }

    async fn expect_single(&self, key: &str, ambient: Option<&mut Transaction>) -> ServiceResult<()> {
        match self.count_matches(key, ambient).await? {
            0 => Err(OperationError::NotFound {
                key: key.to_string(),
            }),
            1 => Ok(()),
            matches => Err(OperationError::AmbiguousState {
                key: key.to_string(),
                matches,
            }),
        }
    }

    fn acquire(&self, key: &str, kind: OperationKind) -> ServiceResult<LockLease<'_>> {
        self.locks
            .try_lease(key, kind)
            .ok_or_else(|| OperationError::LockConflict {
                key: key.to_string(),
                held_by: self.locks.holder(key),
            })
    }

    /// Opens the transaction, runs `mutation`, verifies one affected row and
    /// commits. Returning early drops the scope, which rolls back.
    ///
    /// The storage call gets whatever is left of the transaction timeout.
    async fn execute(
        &self,
        mutation: Mutation<'_>,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<()> {
        let mut scope = self
            .transactions
            .open(self.transactions.default_options(), ambient)
            .await
            .map_err(|err| OperationError::from(err).context("open transaction"))?;

        let budget = scope.transaction().remaining();
        let applied = tokio::time::timeout(budget, self.apply(mutation, scope.transaction())).await;
        let Ok(applied) = applied else {
            return Err(OperationError::from(scope.transaction().timed_out())
                .context(format!("{} customer {}", mutation.kind(), mutation.key())));
        };
        let affected = applied.map_err(|err| match err {
            RepoError::Duplicate(key) => OperationError::Conflict { key },
            other => OperationError::from(other)
                .context(format!("{} customer {}", mutation.kind(), mutation.key())),
        })?;

        if affected != 1 {
            return Err(OperationError::Storage {
                operation: mutation.kind(),
                key: mutation.key().to_string(),
                affected,
            });
        }

        scope
            .commit()
            .map_err(|err| OperationError::from(err).context("commit transaction"))
    }

    async fn apply(&self, mutation: Mutation<'_>, tx: &mut Transaction) -> RepoResult<usize> {
        match mutation {
            Mutation::Insert(customer) => self.repo.insert(customer, tx).await,
            Mutation::Update(key, patch) => self.repo.update(key, patch, tx).await,
            Mutation::Delete(key) => self.repo.delete(key, tx).await,
        }
    }

    async fn read_back(
        &self,
        key: &str,
        ambient: Option<&mut Transaction>,
    ) -> ServiceResult<Customer> {
        let mut rows = self
            .repo
            .query(&CustomerFilter::by_id(key), ambient)
            .await
            .map_err(|err| OperationError::from(err).context("read back customer"))?;
        let count = rows.len();
        match rows.pop() {
            Some(customer) if count == 1 => Ok(customer),
            _ => Err(OperationError::InconsistentState {
                key: key.to_string(),
                rows: count,
            }),
        }
    }

    fn finish<T>(&self, result: ServiceResult<T>, call: &OperationCall) -> ServiceResult<T> {
        let duration_ms = call.started_at.elapsed().as_millis();
        match result {
            Ok(value) => {
                debug!(
                    "event=customer_{} module=service status=ok op_id={} duration_ms={}",
                    call.operation, call.id, duration_ms
                );
                Ok(value)
            }
            Err(err) => {
                debug!(
                    "event=customer_{} module=service status=failed op_id={} duration_ms={}",
                    call.operation, call.id, duration_ms
                );
                Err(classify(err, self.recorder.as_ref(), &call.properties))
            }
        }
    }
}
