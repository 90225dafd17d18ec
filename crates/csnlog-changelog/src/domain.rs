//! Per-domain cursors merged from one cursor per replica.

use crate::composite::CompositeDBCursor;
use crate::cursor::{CursorOptions, DBCursor, KeyMatchingStrategy, PositionStrategy};
use crate::error::Result;
use crate::store::ChangelogStore;
use csnlog_core::{DomainId, ReplicaId, ServerState};
use std::collections::BTreeSet;
use tracing::debug;

/// A domain's changelog, merged from one cursor per replica.
pub type DomainDBCursor<C> = CompositeDBCursor<ReplicaId, C>;

/// Open a cursor over `domain` resuming from `start_state`.
///
/// Each replica known to the store or to the start state gets its own
/// cursor. Replicas present in `start_state` are positioned from their
/// CSN using `options`. The others are positioned from
/// `options.default_csn` with the same strategies, or read from the
/// oldest record when there is no default CSN.
pub fn open_domain_cursor<S>(
    store: &S,
    domain: &DomainId,
    start_state: &ServerState,
    options: &CursorOptions,
) -> Result<DomainDBCursor<S::Cursor>>
where
    S: ChangelogStore + ?Sized,
{
    let replicas: BTreeSet<ReplicaId> = store
        .replica_ids(domain)
        .into_iter()
        .chain(start_state.replica_ids())
        .collect();

    let unknown_replica_options = CursorOptions::new(
        KeyMatchingStrategy::GreaterThanOrEqualToKey,
        PositionStrategy::OnMatchingKey,
    );

    let mut cursor = DomainDBCursor::new();
    for replica_id in replicas {
        let opened = match start_state.max_csn(replica_id) {
            Some(csn) => store.open_replica_cursor(domain, replica_id, Some(&csn), options),
            None => match &options.default_csn {
                Some(default_csn) => {
                    store.open_replica_cursor(domain, replica_id, Some(default_csn), options)
                }
                None => {
                    store.open_replica_cursor(domain, replica_id, None, &unknown_replica_options)
                }
            },
        };
        match opened {
            Ok(replica_cursor) => cursor.add_cursor(replica_id, replica_cursor),
            Err(err) => {
                cursor.close();
                return Err(err);
            }
        }
    }

    debug!(domain = %domain, replicas = cursor.len(), "opened domain cursor");
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChangelogError;
    use crate::memory::MemoryChangelogStore;
    use crate::record::ChangeRecord;
    use csnlog_core::Csn;

    fn domain() -> DomainId {
        DomainId::new("dc=example,dc=com")
    }

    fn populated() -> MemoryChangelogStore<ChangeRecord> {
        let store = MemoryChangelogStore::new();
        for csn in [
            Csn::new(10, 0, 1),
            Csn::new(11, 0, 2),
            Csn::new(20, 0, 1),
            Csn::new(21, 0, 2),
            Csn::new(30, 0, 3),
        ] {
            store.append(&domain(), ChangeRecord::new(csn, csn.to_string())).unwrap();
        }
        store
    }

    fn drain<C: DBCursor<Record = ChangeRecord>>(cursor: &mut C) -> Vec<Csn> {
        let mut seen = Vec::new();
        while cursor.next().unwrap() {
            seen.push(cursor.current().unwrap().csn);
        }
        cursor.close();
        seen
    }

    #[test]
    fn test_empty_state_reads_everything() {
        let store = populated();
        let mut cursor =
            open_domain_cursor(&store, &domain(), &ServerState::new(), &CursorOptions::default())
                .unwrap();
        assert_eq!(cursor.keys(), vec![1, 2, 3]);
        assert_eq!(drain(&mut cursor).len(), 5);
    }

    #[test]
    fn test_resumes_after_state() {
        let store = populated();
        let state = ServerState::from_csns([Csn::new(10, 0, 1), Csn::new(21, 0, 2)]);
        let mut cursor =
            open_domain_cursor(&store, &domain(), &state, &CursorOptions::resume_after()).unwrap();
        assert_eq!(
            drain(&mut cursor),
            vec![Csn::new(20, 0, 1), Csn::new(30, 0, 3)]
        );
    }

    #[test]
    fn test_default_csn_floors_unknown_replicas() {
        let store = populated();
        let state = ServerState::from_csns([Csn::new(10, 0, 1)]);
        let options = CursorOptions::resume_after().with_default_csn(Csn::new(15, 0, 0));
        let mut cursor = open_domain_cursor(&store, &domain(), &state, &options).unwrap();
        assert_eq!(
            drain(&mut cursor),
            vec![Csn::new(20, 0, 1), Csn::new(21, 0, 2), Csn::new(30, 0, 3)]
        );
    }

    #[test]
    fn test_default_csn_follows_position_strategy() {
        let store = MemoryChangelogStore::new();
        for ts in [10, 20, 30] {
            let csn = Csn::new(ts, 0, 1);
            store.append(&domain(), ChangeRecord::new(csn, csn.to_string())).unwrap();
        }

        let after = CursorOptions::resume_after().with_default_csn(Csn::new(20, 0, 1));
        let mut cursor = open_domain_cursor(&store, &domain(), &ServerState::new(), &after).unwrap();
        assert_eq!(drain(&mut cursor), vec![Csn::new(30, 0, 1)]);

        let on = CursorOptions::default().with_default_csn(Csn::new(20, 0, 1));
        let mut cursor = open_domain_cursor(&store, &domain(), &ServerState::new(), &on).unwrap();
        assert_eq!(drain(&mut cursor), vec![Csn::new(20, 0, 1), Csn::new(30, 0, 1)]);
    }

    #[test]
    fn test_state_replica_without_records_gets_a_cursor() {
        let store = populated();
        let state = ServerState::from_csns([Csn::new(5, 0, 9)]);
        let mut cursor =
            open_domain_cursor(&store, &domain(), &state, &CursorOptions::resume_after()).unwrap();
        assert!(cursor.contains(&9));
        assert_eq!(drain(&mut cursor).len(), 5);
    }

    #[test]
    fn test_exact_match_only_applies_to_known_replicas() {
        let store = populated();
        let state = ServerState::from_csns([Csn::new(10, 0, 1)]);
        let options = CursorOptions::new(
            KeyMatchingStrategy::EqualToKey,
            PositionStrategy::OnMatchingKey,
        );
        // Replicas without a state CSN or a default CSN read from the start.
        let mut cursor = open_domain_cursor(&store, &domain(), &state, &options).unwrap();
        assert_eq!(drain(&mut cursor).len(), 5);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let state = ServerState::from_csns([Csn::new(10, 0, 1)]);
        let options = CursorOptions::default();

        struct Refusing;
        impl ChangelogStore for Refusing {
            type Record = ChangeRecord;
            type Cursor = crate::cursor::EmptyCursor<ChangeRecord>;

            fn append(&self, _: &DomainId, _: ChangeRecord) -> Result<()> {
                Ok(())
            }

            fn open_cursor(
                &self,
                _: &DomainId,
                _: Option<&Csn>,
                _: &CursorOptions,
            ) -> Result<Self::Cursor> {
                Err(ChangelogError::Io("offline".to_string()))
            }

            fn open_replica_cursor(
                &self,
                _: &DomainId,
                _: ReplicaId,
                _: Option<&Csn>,
                _: &CursorOptions,
            ) -> Result<Self::Cursor> {
                Err(ChangelogError::Io("offline".to_string()))
            }

            fn domains(&self) -> Vec<DomainId> {
                Vec::new()
            }

            fn replica_ids(&self, _: &DomainId) -> Vec<ReplicaId> {
                vec![1]
            }
        }

        let err = open_domain_cursor(&Refusing, &domain(), &state, &options)
            .err()
            .unwrap();
        assert_eq!(err, ChangelogError::Io("offline".to_string()));
    }
}
