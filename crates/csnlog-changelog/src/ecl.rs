//! The external changelog view of the multi-domain stream.
//!
//! Only domains enabled for the external changelog (ECL) may surface.
//! A domain found disabled while iterating is removed from the
//! underlying cursor. Enabling it again later does not bring back its
//! records unless the domain is re-added.

use crate::cursor::DBCursor;
use crate::error::Result;
use crate::multi_domain::MultiDomainDBCursor;
use crate::store::ChangelogStore;
use csnlog_core::DomainId;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Decides which domains are exposed through the external changelog.
pub trait EclEnabledDomainPredicate: Send + Sync {
    fn is_ecl_enabled_domain(&self, domain: &DomainId) -> bool;
}

impl<F> EclEnabledDomainPredicate for F
where
    F: Fn(&DomainId) -> bool + Send + Sync,
{
    fn is_ecl_enabled_domain(&self, domain: &DomainId) -> bool {
        self(domain)
    }
}

/// A shared, mutable set of enabled domains. Clones share the set.
#[derive(Clone, Debug, Default)]
pub struct EclEnabledDomains {
    enabled: Arc<RwLock<BTreeSet<DomainId>>>,
}

impl EclEnabledDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, domain: DomainId) -> bool {
        self.enabled.write().insert(domain)
    }

    pub fn disable(&self, domain: &DomainId) -> bool {
        self.enabled.write().remove(domain)
    }

    pub fn enabled(&self) -> Vec<DomainId> {
        self.enabled.read().iter().cloned().collect()
    }
}

impl FromIterator<DomainId> for EclEnabledDomains {
    fn from_iter<I: IntoIterator<Item = DomainId>>(iter: I) -> Self {
        EclEnabledDomains {
            enabled: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

impl EclEnabledDomainPredicate for EclEnabledDomains {
    fn is_ecl_enabled_domain(&self, domain: &DomainId) -> bool {
        self.enabled.read().contains(domain)
    }
}

/// A [`MultiDomainDBCursor`] that skips and drops disabled domains.
pub struct EclMultiDomainDBCursor<S: ChangelogStore, P> {
    predicate: P,
    cursor: MultiDomainDBCursor<S>,
}

impl<S, P> EclMultiDomainDBCursor<S, P>
where
    S: ChangelogStore,
    P: EclEnabledDomainPredicate,
{
    pub fn new(predicate: P, cursor: MultiDomainDBCursor<S>) -> Self {
        EclMultiDomainDBCursor { predicate, cursor }
    }

    /// The domain of the current record.
    pub fn domain(&self) -> Option<&DomainId> {
        self.cursor.domain()
    }

    /// Flag `domain` for removal at the next `next()`.
    pub fn remove_domain(&self, domain: &DomainId) {
        self.cursor.remove_domain(domain);
    }

    /// The underlying cursor, for adding domains.
    pub fn inner_mut(&mut self) -> &mut MultiDomainDBCursor<S> {
        &mut self.cursor
    }

    pub fn inner(&self) -> &MultiDomainDBCursor<S> {
        &self.cursor
    }

    pub fn predicate(&self) -> &P {
        &self.predicate
    }
}

impl<S, P> DBCursor for EclMultiDomainDBCursor<S, P>
where
    S: ChangelogStore,
    P: EclEnabledDomainPredicate,
{
    type Record = S::Record;

    fn record(&self) -> Option<&S::Record> {
        self.cursor.record()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.cursor.next()? {
            return Ok(false);
        }
        while let Some(domain) = self.cursor.domain().cloned() {
            if self.predicate.is_ecl_enabled_domain(&domain) {
                return Ok(true);
            }
            debug!(domain = %domain, "dropping domain not enabled for the external changelog");
            self.cursor.remove_domain(&domain);
            if !self.cursor.next()? {
                return Ok(false);
            }
        }
        Ok(false)
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_domains_set() {
        let domains: EclEnabledDomains = [DomainId::new("o=a")].into_iter().collect();
        assert!(domains.is_ecl_enabled_domain(&DomainId::new("o=a")));
        assert!(!domains.is_ecl_enabled_domain(&DomainId::new("o=b")));

        assert!(domains.enable(DomainId::new("o=b")));
        assert!(!domains.enable(DomainId::new("o=b")));
        assert!(domains.disable(&DomainId::new("o=a")));
        assert_eq!(domains.enabled(), vec![DomainId::new("o=b")]);

        let shared = domains.clone();
        shared.enable(DomainId::new("o=c"));
        assert!(domains.is_ecl_enabled_domain(&DomainId::new("o=c")));
    }

    #[test]
    fn test_closure_predicate() {
        let predicate = |domain: &DomainId| domain.as_str().starts_with("o=");
        assert!(predicate.is_ecl_enabled_domain(&DomainId::new("o=a")));
        assert!(!predicate.is_ecl_enabled_domain(&DomainId::new("cn=changelog")));
    }
}
