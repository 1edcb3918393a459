//! The application-owned cache context.
//!
//! One value owns every cache component for the life of the process. Host
//! code builds it once at startup, calls [`CacheContext::start`], and hands
//! out references.

use std::sync::Arc;
use tidemark_analytics::{CacheAnalytics, CacheAnalyticsTracker};
use tidemark_core::{
    ConfigError, DurableStore, IdleSignal, NetworkConditions, PageView, PrefetchStrategy,
    QueryStore, Relationship, RelationshipKind, RoutePredictor, StorageEstimate, TidemarkConfig,
    TidemarkResult,
};
use tidemark_storage::{DependencyGraph, InvalidationEngine};
use tidemark_warming::{BehaviorTracker, WarmingScheduler};

/// Builder for [`CacheContext`].
#[derive(Default)]
pub struct CacheContextBuilder {
    config: TidemarkConfig,
    relationships: Vec<Relationship>,
    query_store: Option<Arc<dyn QueryStore>>,
    durable: Option<Arc<dyn DurableStore>>,
    storage_estimate: Option<Arc<dyn StorageEstimate>>,
    predictor: Option<Arc<dyn RoutePredictor>>,
    prefetch: Option<Arc<dyn PrefetchStrategy>>,
    network: Option<Arc<dyn NetworkConditions>>,
    idle: Option<Arc<dyn IdleSignal>>,
}

impl CacheContextBuilder {
    pub fn config(mut self, config: TidemarkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn relationship(
        mut self,
        from: &str,
        to: &str,
        kind: RelationshipKind,
        field: Option<&str>,
    ) -> Self {
        self.relationships.push(Relationship {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            field: field.map(str::to_string),
        });
        self
    }

    pub fn relationships(mut self, relationships: impl IntoIterator<Item = Relationship>) -> Self {
        self.relationships.extend(relationships);
        self
    }

    pub fn query_store(mut self, store: Arc<dyn QueryStore>) -> Self {
        self.query_store = Some(store);
        self
    }

    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn storage_estimate(mut self, estimate: Arc<dyn StorageEstimate>) -> Self {
        self.storage_estimate = Some(estimate);
        self
    }

    pub fn route_predictor(mut self, predictor: Arc<dyn RoutePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn prefetch_strategy(mut self, prefetch: Arc<dyn PrefetchStrategy>) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn network_conditions(mut self, network: Arc<dyn NetworkConditions>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn idle_signal(mut self, idle: Arc<dyn IdleSignal>) -> Self {
        self.idle = Some(idle);
        self
    }

    /// Validate the configuration and wire the components together.
    pub fn build(self) -> TidemarkResult<CacheContext> {
        self.config.validate()?;

        let query_store = self.query_store.ok_or_else(|| ConfigError::MissingRequired {
            field: "query_store".to_string(),
        })?;
        let predictor = self.predictor.ok_or_else(|| ConfigError::MissingRequired {
            field: "route_predictor".to_string(),
        })?;
        let prefetch = self.prefetch.ok_or_else(|| ConfigError::MissingRequired {
            field: "prefetch_strategy".to_string(),
        })?;

        let graph = Arc::new(DependencyGraph::new());
        graph.extend(self.relationships);

        let mut analytics =
            CacheAnalyticsTracker::new(&self.config.analytics).with_query_store(query_store.clone());
        if let Some(estimate) = self.storage_estimate {
            analytics = analytics.with_storage_estimate(estimate);
        }
        let analytics = Arc::new(analytics);

        let mut engine = InvalidationEngine::new(graph.clone(), self.config.invalidation.clone())
            .with_analytics(analytics.clone());
        let mut behavior = BehaviorTracker::new(&self.config.behavior);
        if let Some(durable) = &self.durable {
            engine = engine.with_durable_store(durable.clone());
            behavior = behavior.with_durable_store(durable.clone());
        }
        let behavior = Arc::new(behavior);

        let mut scheduler = WarmingScheduler::new(
            behavior.clone(),
            predictor,
            prefetch,
            self.config.warming.clone(),
        );
        if let Some(network) = self.network {
            scheduler = scheduler.with_network_conditions(network);
        }
        if let Some(idle) = self.idle {
            scheduler = scheduler.with_idle_signal(idle);
        }

        Ok(CacheContext {
            config: self.config,
            query_store,
            graph,
            engine: Arc::new(engine),
            behavior,
            scheduler: Arc::new(scheduler),
            analytics,
        })
    }
}

/// Every cache component, owned together.
pub struct CacheContext {
    config: TidemarkConfig,
    query_store: Arc<dyn QueryStore>,
    graph: Arc<DependencyGraph>,
    engine: Arc<InvalidationEngine>,
    behavior: Arc<BehaviorTracker>,
    scheduler: Arc<WarmingScheduler>,
    analytics: Arc<CacheAnalyticsTracker>,
}

impl CacheContext {
    pub fn builder() -> CacheContextBuilder {
        CacheContextBuilder::default()
    }

    /// Restore persisted history, bind the query store and start warming.
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) {
        let restored = self.behavior.restore().await;
        self.engine.initialize(self.query_store.clone());
        self.scheduler.start();
        tracing::info!(
            entities = self.graph.entities().len(),
            restored_views = restored,
            "Cache context started"
        );
    }

    /// Stop warming and flush pending invalidations.
    pub async fn shutdown(&self) {
        self.scheduler.stop();
        self.engine.shutdown().await;
        tracing::info!("Cache context shut down");
    }

    pub fn config(&self) -> &TidemarkConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn invalidation(&self) -> &Arc<InvalidationEngine> {
        &self.engine
    }

    pub fn behavior(&self) -> &Arc<BehaviorTracker> {
        &self.behavior
    }

    pub fn warming(&self) -> &Arc<WarmingScheduler> {
        &self.scheduler
    }

    pub fn analytics(&self) -> &Arc<CacheAnalyticsTracker> {
        &self.analytics
    }

    /// Shorthand for a batched invalidation.
    pub fn invalidate(&self, entity: &str, entity_id: Option<&str>, reason: &str) {
        self.engine.invalidate(entity, entity_id, reason);
    }

    /// Shorthand for recording navigation.
    pub async fn track_page_view(&self, route: &str) -> PageView {
        self.behavior.track_page_view(route).await
    }

    /// Shorthand for the analytics report.
    pub async fn report(&self) -> CacheAnalytics {
        self.analytics.analytics().await
    }
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("engine", &self.engine)
            .field("behavior", &self.behavior)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
