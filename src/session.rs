// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Extraction Session
 * Explicit context shared by every component call: options, result
 * cache, ranked alphabet, injection point registry and cancellation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::alphabet::RankedAlphabet;
use crate::cache::{CacheEntry, ResultCache};
use crate::circuit_breaker::WafCircuitBreaker;
use crate::config::ExtractionOptions;
use crate::coordinator::{BatchOutcome, ExtractionCoordinator};
use crate::errors::{CacheError, ConfigError, EngineError, EngineResult, ExtractionError};
use crate::events::{EventSink, NullSink};
use crate::extractor::Extractor;
use crate::point::InjectionPoint;
use crate::probe::{CancelSignal, ProbeGate, ProbeStats};
use crate::selector::TechniqueSelector;
use crate::store::{SessionStore, StoredValue};
use crate::types::{ExtractedValue, Query};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

struct SessionInner {
    options: ExtractionOptions,
    selector: TechniqueSelector,
    cache: ResultCache,
    alphabet: RankedAlphabet,
    points: RwLock<HashMap<String, Arc<InjectionPoint>>>,
    events: Arc<dyn EventSink>,
    cancel: CancelSignal,
    stats: Arc<ProbeStats>,
}

/// Cheap to clone; clones share all state
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(options: ExtractionOptions) -> Result<Self, ConfigError> {
        Self::with_events(options, Arc::new(NullSink))
    }

    pub fn with_events(options: ExtractionOptions, events: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        let options = options.validated()?;

        info!(
            workers = options.worker_count,
            cache_capacity = options.cache_capacity,
            waf_block_threshold = options.waf_block_threshold,
            "Extraction session created"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                selector: TechniqueSelector::from_options(&options),
                cache: ResultCache::new(options.cache_capacity),
                alphabet: RankedAlphabet::new(),
                points: RwLock::new(HashMap::new()),
                events,
                cancel: CancelSignal::new(),
                stats: Arc::new(ProbeStats::default()),
                options,
            }),
        })
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.inner.options
    }

    pub fn selector(&self) -> &TechniqueSelector {
        &self.inner.selector
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn alphabet(&self) -> &RankedAlphabet {
        &self.inner.alphabet
    }

    pub fn events(&self) -> &dyn EventSink {
        self.inner.events.as_ref()
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.inner.stats
    }

    /// Add a point handed over by detection. Re-registering an id replaces
    /// the previous point, including its calibration.
    pub fn register(&self, point: InjectionPoint) -> Arc<InjectionPoint> {
        let point = Arc::new(point);
        let previous = self
            .inner
            .points
            .write()
            .insert(point.id().to_string(), Arc::clone(&point));
        if previous.is_some() {
            warn!(point = point.id(), "Injection point re-registered");
        }
        point
    }

    pub fn point(&self, id: &str) -> EngineResult<Arc<InjectionPoint>> {
        self.inner
            .points
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPoint(id.to_string()))
    }

    /// Abort pending probes and jobs. Irreversible for this session.
    pub fn cancel(&self) {
        info!("Extraction session cancelled");
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Probe gate for one run, with a fresh WAF breaker
    pub(crate) fn gate(&self) -> ProbeGate {
        ProbeGate::new(
            self.inner.cancel.clone(),
            Arc::new(WafCircuitBreaker::new(self.inner.options.waf_block_threshold)),
            Arc::clone(&self.inner.stats),
            Arc::clone(&self.inner.events),
        )
    }

    pub async fn extract(
        &self,
        point: &InjectionPoint,
        query: Query,
        max_length: Option<usize>,
    ) -> EngineResult<ExtractedValue> {
        let gate = self.gate();
        Extractor::new(self, point, &gate).extract(query, max_length).await
    }

    pub async fn extract_rows(&self, point: &Arc<InjectionPoint>, queries: Vec<Query>) -> BatchOutcome {
        ExtractionCoordinator::new(self.clone(), Arc::clone(point))
            .run(queries)
            .await
    }

    /// Count the set, then extract `row(i)` for every index
    pub async fn enumerate<F>(
        &self,
        point: &Arc<InjectionPoint>,
        count_query: Query,
        row: F,
    ) -> EngineResult<BatchOutcome>
    where
        F: Fn(u64) -> Query,
    {
        let count = self
            .extract(point, count_query, None)
            .await?
            .as_count()
            .ok_or_else(|| ExtractionError::Malformed("count query did not yield a count".to_string()))?;

        info!(point = point.id(), count = count, "Enumerating rows");

        let queries: Vec<Query> = (0..count).map(row).collect();
        Ok(self.extract_rows(point, queries).await)
    }

    /// Seed the cache from a store. Returns how many entries were loaded.
    pub async fn restore_from(&self, store: &dyn SessionStore) -> anyhow::Result<usize> {
        let entries = store.load()?;
        let mut restored = 0;

        for (fingerprint, stored) in entries {
            match self
                .cache()
                .store_entry(
                    &fingerprint,
                    CacheEntry::with_timestamp(stored.value, stored.stored_at),
                )
                .await
            {
                Ok(()) => restored += 1,
                Err(CacheError::Conflict { fingerprint }) => {
                    warn!(fingerprint = %fingerprint, "Stored value conflicts with cache, skipped");
                }
            }
        }

        info!(restored = restored, "Session restored");
        Ok(restored)
    }

    /// Snapshot the cache into a store. Returns how many entries were saved.
    pub fn persist_to(&self, store: &dyn SessionStore) -> anyhow::Result<usize> {
        let entries: BTreeMap<String, StoredValue> = self
            .cache()
            .snapshot()
            .into_iter()
            .map(|(fingerprint, value, stored_at)| (fingerprint, StoredValue { value, stored_at }))
            .collect();

        let saved = entries.len();
        store.save(&entries)?;
        info!(saved = saved, "Session persisted");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{dialect_for, Dbms};
    use crate::probe::{Probe, ProbeError, ProbeRequest, RawResponse};
    use async_trait::async_trait;

    struct SilentProbe;

    #[async_trait]
    impl Probe for SilentProbe {
        async fn send(&self, _request: ProbeRequest) -> Result<RawResponse, ProbeError> {
            Err(ProbeError::Network("unused".into()))
        }
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = ExtractionOptions::default().with_worker_count(0);
        assert!(Session::new(options).is_err());
    }

    #[test]
    fn test_point_registry() {
        let session = Session::new(ExtractionOptions::default()).unwrap();
        session.register(InjectionPoint::new(
            "login.username",
            vec![crate::types::Technique::BooleanBlind],
            dialect_for(Dbms::Sqlite, None),
            Arc::new(SilentProbe),
        ));

        assert_eq!(session.point("login.username").unwrap().id(), "login.username");
        assert_eq!(
            session.point("missing").unwrap_err(),
            EngineError::UnknownPoint("missing".into())
        );
    }

    #[tokio::test]
    async fn test_cancelled_session_refuses_to_probe() {
        let session = Session::new(ExtractionOptions::default()).unwrap();
        let point = session.register(InjectionPoint::new(
            "p",
            vec![crate::types::Technique::BooleanBlind],
            dialect_for(Dbms::MySql, None),
            Arc::new(SilentProbe),
        ));

        session.cancel();
        let err = session
            .extract(&point, Query::scalar("SELECT 1"), None)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(session.stats().sent(), 0);
    }
}
