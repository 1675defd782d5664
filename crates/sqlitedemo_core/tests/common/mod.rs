#![allow(dead_code)]

use async_trait::async_trait;
use sqlitedemo_core::{
    Customer, CustomerFilter, CustomerPatch, CustomerRepository, CustomerService, Database,
    EntityLockTable, LogProperties, LogRecorder, RepoResult, SqliteCustomerRepository,
    Transaction, TransactionCoordinator,
};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub message: String,
    pub properties: LogProperties,
}

/// Recorder keeping every call for assertions.
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<LogEntry>>,
    errors: Mutex<Vec<LogEntry>>,
}

impl RecordingRecorder {
    pub fn events(&self) -> Vec<LogEntry> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<LogEntry> {
        self.errors.lock().unwrap().clone()
    }
}

impl LogRecorder for RecordingRecorder {
    fn write_with(&self, message: &str, properties: &LogProperties) {
        self.events.lock().unwrap().push(LogEntry {
            message: message.to_string(),
            properties: properties.clone(),
        });
    }

    fn write_error_with(&self, error: &(dyn Error + 'static), properties: &LogProperties) {
        self.errors.lock().unwrap().push(LogEntry {
            message: error.to_string(),
            properties: properties.clone(),
        });
    }
}

/// Behaviour switches of [`MemoryRepository`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryScript {
    /// Reported affected-row count for every mutation, skipping the write.
    pub affected: Option<usize>,
    /// Report one inserted row without storing it.
    pub skip_insert_write: bool,
    /// Park inserts until `Gate::release` is notified.
    pub gate_inserts: bool,
}

#[derive(Debug, Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory repository that never touches SQLite; the transaction handle is
/// accepted and ignored.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: Mutex<Vec<Customer>>,
    script: Mutex<MemoryScript>,
    pub gate: Gate,
    mutations: AtomicUsize,
}

impl MemoryRepository {
    pub fn with_rows(rows: Vec<Customer>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn set_script(&self, script: MemoryScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn rows(&self) -> Vec<Customer> {
        self.rows.lock().unwrap().clone()
    }

    /// Number of insert/update/delete calls that reached the repository.
    pub fn mutation_calls(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn script(&self) -> MemoryScript {
        *self.script.lock().unwrap()
    }
}

fn matches_filter(customer: &Customer, filter: &CustomerFilter) -> bool {
    filter
        .customer_id
        .as_ref()
        .map_or(true, |id| &customer.customer_id == id)
        && filter.company_name.as_ref().map_or(true, |name| {
            customer
                .company_name
                .to_lowercase()
                .contains(&name.to_lowercase())
        })
        && filter
            .region
            .as_ref()
            .map_or(true, |region| customer.region.as_ref() == Some(region))
        && filter
            .postal_code
            .as_ref()
            .map_or(true, |code| customer.postal_code.as_ref() == Some(code))
}

#[async_trait]
impl CustomerRepository for MemoryRepository {
    async fn query(
        &self,
        filter: &CustomerFilter,
        _tx: Option<&mut Transaction>,
    ) -> RepoResult<Vec<Customer>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|customer| matches_filter(customer, filter))
            .cloned()
            .collect())
    }

    async fn insert(&self, customer: &Customer, _tx: &mut Transaction) -> RepoResult<usize> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if script.gate_inserts {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
        }
        if let Some(affected) = script.affected {
            return Ok(affected);
        }
        if !script.skip_insert_write {
            self.rows.lock().unwrap().push(customer.clone());
        }
        Ok(1)
    }

    async fn update(
        &self,
        key: &str,
        patch: &CustomerPatch,
        _tx: &mut Transaction,
    ) -> RepoResult<usize> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(affected) = self.script().affected {
            return Ok(affected);
        }
        let mut rows = self.rows.lock().unwrap();
        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| row.customer_id == key) {
            *row = patch.apply_to(key);
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&self, key: &str, _tx: &mut Transaction) -> RepoResult<usize> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(affected) = self.script().affected {
            return Ok(affected);
        }
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| row.customer_id != key);
        Ok(before - rows.len())
    }
}

/// Misbehaviour injected around the real SQLite repository.
#[derive(Debug, Clone, Copy)]
pub enum SqliteScript {
    PassThrough,
    /// Perform the write, then report zero affected rows.
    ReportZero,
    /// Sleep before inserting.
    SlowInsert(Duration),
    /// Perform the insert, then never return.
    HangAfterInsert,
}

#[derive(Debug, Clone)]
pub struct ScriptedSqliteRepository {
    inner: SqliteCustomerRepository,
    script: SqliteScript,
}

impl ScriptedSqliteRepository {
    pub fn new(db: Database, script: SqliteScript) -> Self {
        Self {
            inner: SqliteCustomerRepository::new(db),
            script,
        }
    }
}

#[async_trait]
impl CustomerRepository for ScriptedSqliteRepository {
    async fn query(
        &self,
        filter: &CustomerFilter,
        tx: Option<&mut Transaction>,
    ) -> RepoResult<Vec<Customer>> {
        self.inner.query(filter, tx).await
    }

    async fn insert(&self, customer: &Customer, tx: &mut Transaction) -> RepoResult<usize> {
        match self.script {
            SqliteScript::PassThrough => self.inner.insert(customer, tx).await,
            SqliteScript::ReportZero => {
                self.inner.insert(customer, tx).await?;
                Ok(0)
            }
            SqliteScript::SlowInsert(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.insert(customer, tx).await
            }
            SqliteScript::HangAfterInsert => {
                self.inner.insert(customer, tx).await?;
                std::future::pending::<RepoResult<usize>>().await
            }
        }
    }

    async fn update(
        &self,
        key: &str,
        patch: &CustomerPatch,
        tx: &mut Transaction,
    ) -> RepoResult<usize> {
        let changed = self.inner.update(key, patch, tx).await?;
        match self.script {
            SqliteScript::ReportZero => Ok(0),
            _ => Ok(changed),
        }
    }

    async fn delete(&self, key: &str, tx: &mut Transaction) -> RepoResult<usize> {
        let changed = self.inner.delete(key, tx).await?;
        match self.script {
            SqliteScript::ReportZero => Ok(0),
            _ => Ok(changed),
        }
    }
}

/// Service wired to a fresh in-memory database.
pub struct Harness<R: CustomerRepository> {
    pub service: CustomerService<R>,
    pub recorder: Arc<RecordingRecorder>,
    pub locks: Arc<EntityLockTable>,
    pub coordinator: TransactionCoordinator,
}

impl<R: CustomerRepository> Harness<R> {
    pub fn with_repo(make_repo: impl FnOnce(Database) -> R) -> Self {
        Self::with_repo_and_timeout(make_repo, TEST_TIMEOUT)
    }

    pub fn with_repo_and_timeout(make_repo: impl FnOnce(Database) -> R, timeout: Duration) -> Self {
        Self::on_database(Database::open_in_memory().unwrap(), make_repo, timeout)
    }

    /// Second service over an existing database, with its own lock table.
    /// `timeout` bounds both its transactions and its waits for the
    /// connection.
    pub fn on_database(
        db: Database,
        make_repo: impl FnOnce(Database) -> R,
        timeout: Duration,
    ) -> Self {
        let db = db.with_lock_timeout(timeout);
        let recorder = Arc::new(RecordingRecorder::default());
        let locks = Arc::new(EntityLockTable::new());
        let coordinator = TransactionCoordinator::new(db.clone(), timeout);
        let dyn_recorder: Arc<dyn LogRecorder> = recorder.clone();
        let service = CustomerService::new(
            make_repo(db),
            Arc::clone(&locks),
            coordinator.clone(),
            dyn_recorder,
        );
        Self {
            service,
            recorder,
            locks,
            coordinator,
        }
    }
}

pub fn sqlite_harness() -> Harness<SqliteCustomerRepository> {
    Harness::with_repo(SqliteCustomerRepository::new)
}

pub fn scripted_harness(script: SqliteScript) -> Harness<ScriptedSqliteRepository> {
    Harness::with_repo(|db| ScriptedSqliteRepository::new(db, script))
}

pub fn memory_harness(rows: Vec<Customer>) -> Harness<MemoryRepository> {
    Harness::with_repo(|_| MemoryRepository::with_rows(rows))
}

pub fn customer(id: &str) -> Customer {
    let mut customer = Customer::new(id, format!("{id} Trading"));
    customer.contact_name = Some("Maria Anders".to_string());
    customer.city = Some("Berlin".to_string());
    customer.region = Some("BE".to_string());
    customer.postal_code = Some("12209".to_string());
    customer.country = Some("Germany".to_string());
    customer
}
