//! Structured diffs between versions, promotion recommendations, and
//! lineage walks.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use modelhub_core::VersionRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{VersionCatalog, VersionFilter};

/// Polarity of a metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    #[default]
    HigherIsBetter,
    /// Latency, error rates, loss.
    LowerIsBetter,
}

impl MetricDirection {
    /// Whether moving by `difference` is an improvement.
    pub fn improved(&self, difference: f64) -> bool {
        match self {
            MetricDirection::HigherIsBetter => difference > 0.0,
            MetricDirection::LowerIsBetter => difference < 0.0,
        }
    }
}

/// Change of one metric between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub value_a: Option<f64>,
    pub value_b: Option<f64>,
    /// `b - a`, when both sides report the metric.
    pub difference: Option<f64>,
    /// Relative change in percent. Absent when `a` is zero or missing.
    pub percent_change: Option<f64>,
    pub improved: bool,
    pub direction: MetricDirection,
}

impl MetricDelta {
    fn new(value_a: Option<f64>, value_b: Option<f64>, direction: MetricDirection) -> Self {
        let difference = match (value_a, value_b) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
        let percent_change = match (value_a, difference) {
            (Some(a), Some(d)) if a != 0.0 => Some(d / a.abs() * 100.0),
            _ => None,
        };
        MetricDelta {
            value_a,
            value_b,
            difference,
            percent_change,
            improved: difference.is_some_and(|d| direction.improved(d)),
            direction,
        }
    }

    pub fn present_in_a(&self) -> bool {
        self.value_a.is_some()
    }

    pub fn present_in_b(&self) -> bool {
        self.value_b.is_some()
    }

    fn degraded(&self) -> bool {
        self.difference
            .is_some_and(|d| d != 0.0 && !self.direction.improved(d))
    }
}

/// Differences in descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDiff {
    pub tags_added: BTreeSet<String>,
    pub tags_removed: BTreeSet<String>,
    pub description_changed: bool,
    pub dependencies_added: BTreeMap<String, String>,
    pub dependencies_removed: BTreeMap<String, String>,
    /// Dependency name to `(version in a, version in b)`.
    pub dependencies_changed: BTreeMap<String, (String, String)>,
    pub configuration_added: BTreeSet<String>,
    pub configuration_removed: BTreeSet<String>,
    pub configuration_changed: BTreeSet<String>,
}

impl MetadataDiff {
    fn between(a: &VersionRecord, b: &VersionRecord) -> Self {
        let mut diff = MetadataDiff {
            tags_added: b.tags.difference(&a.tags).cloned().collect(),
            tags_removed: a.tags.difference(&b.tags).cloned().collect(),
            description_changed: a.description != b.description,
            ..Default::default()
        };

        for (name, version) in &b.dependencies {
            match a.dependencies.get(name) {
                None => {
                    diff.dependencies_added.insert(name.clone(), version.clone());
                }
                Some(old) if old != version => {
                    diff.dependencies_changed
                        .insert(name.clone(), (old.clone(), version.clone()));
                }
                Some(_) => {}
            }
        }
        for (name, version) in &a.dependencies {
            if !b.dependencies.contains_key(name) {
                diff.dependencies_removed.insert(name.clone(), version.clone());
            }
        }

        for (key, value) in &b.configuration {
            match a.configuration.get(key) {
                None => {
                    diff.configuration_added.insert(key.clone());
                }
                Some(old) if old != value => {
                    diff.configuration_changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in a.configuration.keys() {
            if !b.configuration.contains_key(key) {
                diff.configuration_removed.insert(key.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        *self == MetadataDiff::default()
    }
}

/// Counts over metrics reported by both versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSummary {
    pub improved: usize,
    pub degraded: usize,
    pub unchanged: usize,
    pub total: usize,
    /// `(improved - degraded) / total * 100`, zero when nothing is comparable.
    pub overall_improvement: f64,
}

impl ImprovementSummary {
    fn from_deltas<'a>(deltas: impl IntoIterator<Item = &'a MetricDelta>) -> Self {
        let mut summary = ImprovementSummary::default();
        for delta in deltas.into_iter().filter(|d| d.difference.is_some()) {
            summary.total += 1;
            if delta.improved {
                summary.improved += 1;
            } else if delta.degraded() {
                summary.degraded += 1;
            } else {
                summary.unchanged += 1;
            }
        }
        if summary.total > 0 {
            summary.overall_improvement =
                (summary.improved as f64 - summary.degraded as f64) / summary.total as f64 * 100.0;
        }
        summary
    }
}

/// Promotion advice derived from the overall improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Upgrade,
    ConsiderUpgrade,
    Equivalent,
    Stay,
}

impl Recommendation {
    pub fn from_improvement(overall: f64) -> Self {
        if overall > 20.0 {
            Recommendation::Upgrade
        } else if overall > 0.0 {
            Recommendation::ConsiderUpgrade
        } else if overall < -20.0 {
            Recommendation::Stay
        } else {
            Recommendation::Equivalent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Upgrade => "upgrade",
            Recommendation::ConsiderUpgrade => "consider_upgrade",
            Recommendation::Equivalent => "equivalent",
            Recommendation::Stay => "stay",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full comparison of version `b` against version `a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub version_a: String,
    pub version_b: String,
    pub metrics: BTreeMap<String, MetricDelta>,
    /// Seconds from `a`'s creation to `b`'s.
    pub time_difference_secs: i64,
    pub size_difference_bytes: i64,
    /// `b` was derived from `a`.
    pub is_parent_child: bool,
    pub metadata: MetadataDiff,
    pub improvements: ImprovementSummary,
    pub recommendation: Recommendation,
}

/// Compares versions held by the catalog.
pub struct Comparator {
    catalog: Arc<VersionCatalog>,
    directions: BTreeMap<String, MetricDirection>,
    max_lineage_depth: usize,
}

impl Comparator {
    pub fn new(
        catalog: Arc<VersionCatalog>,
        directions: BTreeMap<String, MetricDirection>,
        max_lineage_depth: usize,
    ) -> Self {
        Comparator {
            catalog,
            directions,
            max_lineage_depth,
        }
    }

    fn direction_of(&self, metric: &str) -> MetricDirection {
        self.directions.get(metric).copied().unwrap_or_default()
    }

    /// Compare two versions by id. Absent if either is unknown.
    pub fn compare(&self, version_a: &str, version_b: &str) -> Option<VersionComparison> {
        let Some(a) = self.catalog.get_version(version_a) else {
            debug!(version_id = %version_a, "comparison target not found");
            return None;
        };
        let Some(b) = self.catalog.get_version(version_b) else {
            debug!(version_id = %version_b, "comparison target not found");
            return None;
        };
        Some(self.compare_records(&a, &b))
    }

    pub fn compare_records(&self, a: &VersionRecord, b: &VersionRecord) -> VersionComparison {
        let names: BTreeSet<&String> = a.metrics.keys().chain(b.metrics.keys()).collect();
        let metrics: BTreeMap<String, MetricDelta> = names
            .into_iter()
            .map(|name| {
                let delta = MetricDelta::new(
                    a.metrics.get(name).copied(),
                    b.metrics.get(name).copied(),
                    self.direction_of(name),
                );
                (name.clone(), delta)
            })
            .collect();

        let improvements = ImprovementSummary::from_deltas(metrics.values());
        let recommendation = Recommendation::from_improvement(improvements.overall_improvement);

        VersionComparison {
            version_a: a.version_id.clone(),
            version_b: b.version_id.clone(),
            time_difference_secs: (b.created_at - a.created_at).num_seconds(),
            size_difference_bytes: b.size_bytes as i64 - a.size_bytes as i64,
            is_parent_child: b.parent_version.as_deref() == Some(a.version_id.as_str()),
            metadata: MetadataDiff::between(a, b),
            metrics,
            improvements,
            recommendation,
        }
    }

    /// Compare a version against a baseline, by default the earliest
    /// version of the same model.
    pub fn compare_to_baseline(&self, version_id: &str, baseline: Option<&str>) -> Option<VersionComparison> {
        let record = self.catalog.get_version(version_id)?;
        let baseline = match baseline {
            Some(id) => self.catalog.get_version(id)?,
            None => self
                .catalog
                .list_versions(&VersionFilter::model(&record.model_id))
                .into_iter()
                .last()?,
        };
        Some(self.compare_records(&baseline, &record))
    }

    /// Ancestors of a version followed by the version itself, oldest first.
    ///
    /// The walk stops at a missing parent, a repeated id, or after
    /// `max_lineage_depth` hops.
    pub fn lineage(&self, version_id: &str) -> Vec<VersionRecord> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(version_id.to_string());

        while let Some(id) = next.take() {
            if !visited.insert(id.clone()) {
                warn!(%version_id, repeated = %id, "lineage cycle detected");
                break;
            }
            if chain.len() > self.max_lineage_depth {
                warn!(%version_id, depth = self.max_lineage_depth, "lineage truncated at depth limit");
                break;
            }
            let Some(record) = self.catalog.get_version(&id) else {
                if !chain.is_empty() {
                    warn!(%version_id, missing = %id, "lineage ends at missing ancestor");
                }
                break;
            };
            next = record.parent_version.clone();
            chain.push(record);
        }

        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::catalog_in;
    use crate::catalog::NewVersion;
    use modelhub_core::{VersionMetadata, VersioningStrategy};

    fn comparator(catalog: Arc<VersionCatalog>) -> Comparator {
        let directions = BTreeMap::from([("latency_ms".to_string(), MetricDirection::LowerIsBetter)]);
        Comparator::new(catalog, directions, 16)
    }

    async fn with_metrics(catalog: &VersionCatalog, metrics: &[(&str, f64)]) -> String {
        let metadata = metrics
            .iter()
            .fold(VersionMetadata::default(), |m, (name, value)| m.with_metric(*name, *value));
        catalog
            .create_version(NewVersion::new("m", b"x".to_vec()).with_metadata(metadata))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accuracy_gain_is_an_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Semantic, 10));
        let v1 = with_metrics(&catalog, &[("accuracy", 0.8)]).await;
        let v2 = with_metrics(&catalog, &[("accuracy", 0.9)]).await;

        let cmp = comparator(catalog).compare(&v1, &v2).unwrap();
        let accuracy = &cmp.metrics["accuracy"];
        assert!(accuracy.improved);
        assert!((accuracy.percent_change.unwrap() - 12.5).abs() < 1e-9);
        assert!((accuracy.difference.unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(cmp.improvements.improved, 1);
        assert_eq!(cmp.improvements.overall_improvement, 100.0);
        assert_eq!(cmp.recommendation, Recommendation::Upgrade);
        assert!(cmp.time_difference_secs >= 0);
    }

    #[tokio::test]
    async fn lower_is_better_metrics_respect_direction() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Semantic, 10));
        let v1 = with_metrics(&catalog, &[("latency_ms", 40.0), ("accuracy", 0.9)]).await;
        let v2 = with_metrics(&catalog, &[("latency_ms", 30.0), ("accuracy", 0.8)]).await;

        let cmp = comparator(catalog).compare(&v1, &v2).unwrap();
        assert!(cmp.metrics["latency_ms"].improved);
        assert!(!cmp.metrics["accuracy"].improved);
        assert_eq!(cmp.improvements.improved, 1);
        assert_eq!(cmp.improvements.degraded, 1);
        assert_eq!(cmp.recommendation, Recommendation::Equivalent);
    }

    #[tokio::test]
    async fn one_sided_metrics_are_reported_but_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Semantic, 10));
        let v1 = with_metrics(&catalog, &[("accuracy", 0.0), ("recall", 0.5)]).await;
        let v2 = with_metrics(&catalog, &[("accuracy", 0.5), ("f1", 0.7)]).await;

        let cmp = comparator(catalog).compare(&v1, &v2).unwrap();
        let f1 = &cmp.metrics["f1"];
        assert!(!f1.present_in_a() && f1.present_in_b());
        assert!(f1.difference.is_none());
        assert!(!cmp.metrics["recall"].present_in_b());
        assert!(cmp.metrics["accuracy"].percent_change.is_none());
        assert_eq!(cmp.improvements.total, 1);
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(Recommendation::from_improvement(50.0), Recommendation::Upgrade);
        assert_eq!(Recommendation::from_improvement(20.0), Recommendation::ConsiderUpgrade);
        assert_eq!(Recommendation::from_improvement(0.0), Recommendation::Equivalent);
        assert_eq!(Recommendation::from_improvement(-20.0), Recommendation::Equivalent);
        assert_eq!(Recommendation::from_improvement(-21.0), Recommendation::Stay);
    }

    #[tokio::test]
    async fn metadata_diff_and_parent_flag() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Incremental, 10));
        let v1 = catalog
            .create_version(
                NewVersion::new("m", b"aa".to_vec())
                    .with_tag("baseline")
                    .with_metadata(
                        VersionMetadata::default()
                            .with_dependency("torch", "2.1")
                            .with_dependency("numpy", "1.26")
                            .with_setting("lr", serde_json::json!(0.01)),
                    ),
            )
            .await
            .unwrap();
        let v2 = catalog
            .create_version(
                NewVersion::new("m", b"bbbb".to_vec())
                    .with_parent(&v1)
                    .with_tag("tuned")
                    .with_description("lower lr")
                    .with_metadata(
                        VersionMetadata::default()
                            .with_dependency("torch", "2.2")
                            .with_dependency("pandas", "2.0")
                            .with_setting("lr", serde_json::json!(0.001))
                            .with_setting("epochs", serde_json::json!(5)),
                    ),
            )
            .await
            .unwrap();

        let cmp = comparator(catalog).compare(&v1, &v2).unwrap();
        assert!(cmp.is_parent_child);
        assert_eq!(cmp.size_difference_bytes, 2);
        let diff = &cmp.metadata;
        assert!(diff.tags_added.contains("tuned"));
        assert!(diff.tags_removed.contains("baseline"));
        assert!(diff.description_changed);
        assert!(diff.dependencies_added.contains_key("pandas"));
        assert!(diff.dependencies_removed.contains_key("numpy"));
        assert_eq!(diff.dependencies_changed["torch"], ("2.1".to_string(), "2.2".to_string()));
        assert!(diff.configuration_added.contains("epochs"));
        assert!(diff.configuration_changed.contains("lr"));
        assert!(diff.configuration_removed.is_empty());
        assert_eq!(cmp.recommendation, Recommendation::Equivalent);
    }

    #[tokio::test]
    async fn baseline_defaults_to_earliest_version() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Incremental, 10));
        let first = with_metrics(&catalog, &[("accuracy", 0.5)]).await;
        let _middle = with_metrics(&catalog, &[("accuracy", 0.6)]).await;
        let last = with_metrics(&catalog, &[("accuracy", 0.7)]).await;

        let comparator = comparator(catalog);
        let cmp = comparator.compare_to_baseline(&last, None).unwrap();
        assert_eq!(cmp.version_a, first);
        assert_eq!(cmp.version_b, last);
        assert!(comparator.compare_to_baseline("missing", None).is_none());
        assert!(comparator.compare(&first, "missing").is_none());
    }

    #[tokio::test]
    async fn lineage_is_oldest_first_and_tolerates_deleted_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Incremental, 10));
        let root = catalog.create_version(NewVersion::new("m", b"r".to_vec())).await.unwrap();
        let child = catalog
            .create_version(NewVersion::new("m", b"c".to_vec()).with_parent(&root))
            .await
            .unwrap();
        let grandchild = catalog
            .create_version(NewVersion::new("m", b"g".to_vec()).with_parent(&child))
            .await
            .unwrap();

        let comparator = comparator(catalog.clone());
        let ids: Vec<String> = comparator
            .lineage(&grandchild)
            .into_iter()
            .map(|r| r.version_id)
            .collect();
        assert_eq!(ids, vec![root.clone(), child.clone(), grandchild.clone()]);

        assert!(catalog.delete_version(&root, false).await);
        assert_eq!(comparator.lineage(&grandchild).len(), 2);
        assert!(comparator.lineage("missing").is_empty());
    }

    #[tokio::test]
    async fn lineage_stops_on_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Incremental, 10));
        let a = catalog.create_version(NewVersion::new("m", b"a".to_vec())).await.unwrap();
        let b = catalog
            .create_version(NewVersion::new("m", b"b".to_vec()).with_parent(&a))
            .await
            .unwrap();
        let b_id = b.clone();
        catalog
            .index()
            .update(&a, move |r| {
                r.parent_version = Some(b_id);
                Ok(())
            })
            .unwrap();

        let chain = comparator(catalog).lineage(&b);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last().unwrap().version_id, b);
    }

    #[tokio::test]
    async fn lineage_is_truncated_at_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(catalog_in(dir.path(), VersioningStrategy::Incremental, 10));
        let mut ids = Vec::new();
        let mut parent: Option<String> = None;
        for i in 0..5u8 {
            let mut new = NewVersion::new("m", vec![i]);
            if let Some(parent) = &parent {
                new = new.with_parent(parent);
            }
            let id = catalog.create_version(new).await.unwrap();
            parent = Some(id.clone());
            ids.push(id);
        }

        let shallow = Comparator::new(catalog.clone(), BTreeMap::new(), 2);
        let chain: Vec<String> = shallow
            .lineage(&ids[4])
            .into_iter()
            .map(|r| r.version_id)
            .collect();
        // The version itself plus two ancestors, oldest first.
        assert_eq!(chain, ids[2..].to_vec());

        assert_eq!(comparator(catalog).lineage(&ids[4]).len(), 5);
    }
}
