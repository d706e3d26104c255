//! Persistence of authority records.
//!
//! Every unit of work reads a versioned [`Snapshot`] of one table (roots or
//! intermediates), computes its [`Mutation`]s and commits them together with
//! the version it read. If another unit of work committed in between, the
//! commit fails with [`StoreError::Conflict`] and nothing is written.
//!
//! Units of work that also depend on another table pass its [`TableVersion`]
//! as a guard, which is checked under the same lock as the commit.
use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::{OptionExt, Snafu, ensure};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::authority::{AuthorityKind, AuthorityRecord};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum StoreError {
    #[snafu(display(
        "concurrent modification of the {kind} table, expected version {expected} but found {actual}"
    ))]
    Conflict {
        kind: AuthorityKind,
        expected: u64,
        actual: u64,
    },

    #[snafu(display("a {kind} authority with serial number {serial_number} already exists"))]
    DuplicateSerial {
        kind: AuthorityKind,
        serial_number: u64,
    },

    #[snafu(display("an authority with id {id} already exists"))]
    DuplicateId { id: Uuid },

    #[snafu(display("cannot update authority {id}, it doesn't exist"))]
    MissingRecord { id: Uuid },

    #[snafu(display("cannot store a {actual} authority in the {kind} table"))]
    KindMismatch {
        kind: AuthorityKind,
        actual: AuthorityKind,
    },

    #[snafu(display("at most one root authority can be active, found {count}"))]
    MultipleActiveRoots { count: usize },
}

/// A consistent view of one table at a specific version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub records: Vec<AuthorityRecord>,
}

impl Snapshot {
    pub fn find(&self, id: Uuid) -> Option<&AuthorityRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// The serial number for the next authority in this table: the highest
    /// existing serial number plus one.
    pub fn next_serial(&self) -> u64 {
        self.records
            .iter()
            .map(|record| record.serial_number)
            .max()
            .unwrap_or_default()
            + 1
    }
}

/// The version of a table a unit of work read without writing to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableVersion {
    pub kind: AuthorityKind,
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Insert(AuthorityRecord),
    Update(AuthorityRecord),
}

impl Mutation {
    fn record(&self) -> &AuthorityRecord {
        match self {
            Self::Insert(record) | Self::Update(record) => record,
        }
    }
}

#[async_trait]
pub trait AuthorityStore: Debug + Send + Sync {
    /// Reads all records of the given kind.
    async fn snapshot(&self, kind: AuthorityKind) -> Result<Snapshot, StoreError>;

    /// Atomically applies all `mutations` if the table is still at
    /// `expected_version` and every table in `guards` is still at the given
    /// version. Returns the new version of the table.
    ///
    /// Implementations must reject duplicate serial numbers within a table
    /// and more than one active root.
    async fn commit_guarded(
        &self,
        kind: AuthorityKind,
        expected_version: u64,
        guards: &[TableVersion],
        mutations: Vec<Mutation>,
    ) -> Result<u64, StoreError>;

    /// Same as [`AuthorityStore::commit_guarded`] without guards.
    async fn commit(
        &self,
        kind: AuthorityKind,
        expected_version: u64,
        mutations: Vec<Mutation>,
    ) -> Result<u64, StoreError> {
        self.commit_guarded(kind, expected_version, &[], mutations)
            .await
    }
}

#[derive(Debug, Default)]
struct Table {
    version: u64,
    records: IndexMap<Uuid, AuthorityRecord>,
}

/// An [`AuthorityStore`] keeping all records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuthorityStore {
    tables: RwLock<BTreeMap<AuthorityKind, Table>>,
}

impl InMemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorityStore for InMemoryAuthorityStore {
    async fn snapshot(&self, kind: AuthorityKind) -> Result<Snapshot, StoreError> {
        let tables = self.tables.read().await;

        Ok(tables
            .get(&kind)
            .map(|table| Snapshot {
                version: table.version,
                records: table.records.values().cloned().collect(),
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, mutations), fields(mutations = mutations.len()))]
    async fn commit_guarded(
        &self,
        kind: AuthorityKind,
        expected_version: u64,
        guards: &[TableVersion],
        mutations: Vec<Mutation>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;

        for guard in guards {
            let actual = tables.get(&guard.kind).map_or(0, |table| table.version);
            ensure!(actual == guard.version, ConflictSnafu {
                kind: guard.kind,
                expected: guard.version,
                actual,
            });
        }

        let table = tables.entry(kind).or_default();

        ensure!(table.version == expected_version, ConflictSnafu {
            kind,
            expected: expected_version,
            actual: table.version,
        });

        let mut records = table.records.clone();
        for mutation in mutations {
            let record = mutation.record();
            ensure!(record.kind == kind, KindMismatchSnafu {
                kind,
                actual: record.kind
            });

            let serial_taken = records.values().any(|existing| {
                existing.id != record.id && existing.serial_number == record.serial_number
            });
            ensure!(!serial_taken, DuplicateSerialSnafu {
                kind,
                serial_number: record.serial_number
            });

            match mutation {
                Mutation::Insert(record) => {
                    ensure!(!records.contains_key(&record.id), DuplicateIdSnafu {
                        id: record.id
                    });
                    records.insert(record.id, record);
                }
                Mutation::Update(record) => {
                    let existing = records
                        .get_mut(&record.id)
                        .context(MissingRecordSnafu { id: record.id })?;
                    *existing = record;
                }
            }
        }

        if kind == AuthorityKind::Root {
            let count = records.values().filter(|record| record.active).count();
            ensure!(count <= 1, MultipleActiveRootsSnafu { count });
        }

        table.records = records;
        table.version += 1;

        debug!(version = table.version, "committed authority mutations");
        Ok(table.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::tests::authority;

    fn record(kind: AuthorityKind, serial_number: u64) -> AuthorityRecord {
        let mut record = authority(kind).to_record().expect("failed to encode record");
        record.serial_number = serial_number;
        record
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = InMemoryAuthorityStore::new();
        let snapshot = store
            .snapshot(AuthorityKind::Root)
            .await
            .expect("failed to read snapshot");
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.next_serial(), 1);

        let version = store
            .commit(AuthorityKind::Root, 0, vec![Mutation::Insert(record(
                AuthorityKind::Root,
                1,
            ))])
            .await
            .expect("failed to commit");
        assert_eq!(version, 1);

        assert_eq!(
            store
                .commit(AuthorityKind::Root, 0, vec![Mutation::Insert(record(
                    AuthorityKind::Root,
                    2
                ))])
                .await,
            Err(StoreError::Conflict {
                kind: AuthorityKind::Root,
                expected: 0,
                actual: 1
            })
        );
    }

    #[tokio::test]
    async fn duplicate_serial_is_rejected() {
        let store = InMemoryAuthorityStore::new();
        store
            .commit(AuthorityKind::Intermediate, 0, vec![Mutation::Insert(
                record(AuthorityKind::Intermediate, 4),
            )])
            .await
            .expect("failed to commit");

        assert_eq!(
            store
                .commit(AuthorityKind::Intermediate, 1, vec![Mutation::Insert(
                    record(AuthorityKind::Intermediate, 4),
                )])
                .await,
            Err(StoreError::DuplicateSerial {
                kind: AuthorityKind::Intermediate,
                serial_number: 4
            })
        );

        // Serial numbers are unique per table.
        store
            .commit(AuthorityKind::Root, 0, vec![Mutation::Insert(record(
                AuthorityKind::Root,
                4,
            ))])
            .await
            .expect("serial numbers of different tables must not collide");
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let store = InMemoryAuthorityStore::new();
        let mut first = record(AuthorityKind::Root, 1);
        first.active = true;
        let mut second = record(AuthorityKind::Root, 2);
        second.active = true;

        assert_eq!(
            store
                .commit(AuthorityKind::Root, 0, vec![
                    Mutation::Insert(first),
                    Mutation::Insert(second)
                ])
                .await,
            Err(StoreError::MultipleActiveRoots { count: 2 })
        );

        let snapshot = store
            .snapshot(AuthorityKind::Root)
            .await
            .expect("failed to read snapshot");
        assert_eq!(snapshot, Snapshot::default());
    }

    #[tokio::test]
    async fn moved_guard_table_conflicts() {
        let store = InMemoryAuthorityStore::new();
        store
            .commit(AuthorityKind::Root, 0, vec![Mutation::Insert(record(
                AuthorityKind::Root,
                1,
            ))])
            .await
            .expect("failed to commit root");

        let stale_roots = TableVersion {
            kind: AuthorityKind::Root,
            version: 0,
        };
        assert_eq!(
            store
                .commit_guarded(AuthorityKind::Intermediate, 0, &[stale_roots], vec![
                    Mutation::Insert(record(AuthorityKind::Intermediate, 1))
                ])
                .await,
            Err(StoreError::Conflict {
                kind: AuthorityKind::Root,
                expected: 0,
                actual: 1
            })
        );
        assert_eq!(
            store
                .snapshot(AuthorityKind::Intermediate)
                .await
                .expect("failed to read snapshot"),
            Snapshot::default()
        );

        let current_roots = TableVersion {
            kind: AuthorityKind::Root,
            version: 1,
        };
        store
            .commit_guarded(AuthorityKind::Intermediate, 0, &[current_roots], vec![
                Mutation::Insert(record(AuthorityKind::Intermediate, 1)),
            ])
            .await
            .expect("a current guard must not conflict");
    }

    #[tokio::test]
    async fn update_missing_record() {
        let store = InMemoryAuthorityStore::new();
        let record = record(AuthorityKind::Root, 1);
        let id = record.id;

        assert_eq!(
            store
                .commit(AuthorityKind::Root, 0, vec![Mutation::Update(record)])
                .await,
            Err(StoreError::MissingRecord { id })
        );
    }
}
