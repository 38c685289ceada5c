//! The fixed set of probe targets and their per-target series.

use std::collections::{BTreeMap, HashMap};

use minewatch_types::{PingHistory, PublicTarget, Sample, TargetInfo, TargetRecord, TargetUpdate};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ConfigError;
use crate::series::BoundedSeries;

#[derive(Debug)]
struct TargetState {
    latest: Option<Sample>,
    peak: Option<Sample>,
    version: Option<String>,
    history: BoundedSeries<Sample>,
}

/// One probe target: fixed identity plus state owned by the scheduler.
#[derive(Debug)]
pub struct Target {
    info: TargetInfo,
    state: RwLock<TargetState>,
}

impl Target {
    fn new(info: TargetInfo, max_history: usize) -> Self {
        Self {
            info,
            state: RwLock::new(TargetState {
                latest: None,
                peak: None,
                version: None,
                history: BoundedSeries::new(max_history),
            }),
        }
    }

    pub fn info(&self) -> &TargetInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn latest(&self) -> Option<Sample> {
        self.state.read().latest.clone()
    }

    pub fn peak(&self) -> Option<Sample> {
        self.state.read().peak.clone()
    }

    /// Identity plus latest sample, peak and version.
    pub fn public_data(&self) -> PublicTarget {
        let state = self.state.read();
        PublicTarget {
            info: self.info.clone(),
            latest: state.latest.clone(),
            peak: state.peak.clone(),
            version: state.version.clone(),
        }
    }

    pub fn ping_history(&self) -> PingHistory {
        let state = self.state.read();
        PingHistory {
            id: self.info.id.clone(),
            samples: state.history.to_vec(),
            peak: state.peak.clone(),
        }
    }

    fn observe(&self, sample: &Sample, version: Option<&str>) {
        let mut state = self.state.write();
        state.latest = Some(sample.clone());
        if let Some(version) = version {
            state.version = Some(version.to_string());
        }
    }

    fn record(&self, sample: Sample, version: Option<String>) -> TargetUpdate {
        let mut state = self.state.write();

        let new_peak = match (sample.reading.value(), &state.peak) {
            (Some(value), Some(peak)) if value > peak.reading.value().unwrap_or(0) => {
                Some(sample.clone())
            }
            (Some(_), None) => Some(sample.clone()),
            _ => None,
        };
        if let Some(peak) = &new_peak {
            state.peak = Some(peak.clone());
        }
        if version.is_some() {
            state.version = version;
        }
        state.history.push(sample.clone());
        state.latest = Some(sample.clone());

        TargetUpdate {
            id: self.info.id.clone(),
            sample,
            new_peak,
            version: state.version.clone(),
        }
    }
}

/// All targets, in configuration order. Built once; never grows or shrinks.
#[derive(Debug)]
pub struct TargetRegistry {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
}

impl TargetRegistry {
    pub fn new(infos: Vec<TargetInfo>, max_server_graph_length: usize) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(infos.len());
        let mut targets = Vec::with_capacity(infos.len());
        for info in infos {
            if index.insert(info.id.clone(), targets.len()).is_some() {
                return Err(ConfigError::DuplicateTarget(info.id));
            }
            targets.push(Target::new(info, max_server_graph_length));
        }
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(Self { targets, index })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Target> {
        self.index.get(id).map(|&i| &self.targets[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn public_data(&self) -> Vec<PublicTarget> {
        self.targets.iter().map(Target::public_data).collect()
    }

    pub fn ping_history(&self) -> Vec<PingHistory> {
        self.targets.iter().map(Target::ping_history).collect()
    }

    /// Publish a fresh outcome as the target's latest state without touching
    /// its series. The series entry follows in
    /// [`record_server_point`](Self::record_server_point) when the cycle
    /// commits. Returns `false` for an unknown id.
    pub(crate) fn observe_server_point(
        &self,
        target_id: &str,
        sample: &Sample,
        version: Option<&str>,
    ) -> bool {
        self.get(target_id)
            .map(|t| t.observe(sample, version))
            .is_some()
    }

    /// Record a probe outcome for `target_id`. `None` for an unknown id.
    pub(crate) fn record_server_point(
        &self,
        target_id: &str,
        sample: Sample,
        version: Option<String>,
    ) -> Option<TargetUpdate> {
        self.get(target_id).map(|t| t.record(sample, version))
    }

    /// Seed `latest` and `peak` from storage. Returns how many targets matched.
    pub fn apply_records(&self, records: &BTreeMap<String, TargetRecord>) -> usize {
        let mut applied = 0;
        for (id, record) in records {
            let Some(target) = self.get(id) else {
                debug!(target_id = %id, "Ignoring stored record for unconfigured target");
                continue;
            };
            let mut state = target.state.write();
            state.latest = record.latest.clone();
            state.peak = record.peak.clone();
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minewatch_types::TargetKind;
    use std::sync::Arc;

    fn info(id: &str) -> TargetInfo {
        TargetInfo {
            id: id.to_string(),
            name: id.to_uppercase(),
            host: id.to_string(),
            port: 25565,
            kind: TargetKind::Java,
            color: None,
        }
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert!(matches!(
            TargetRegistry::new(vec![info("a"), info("a")], 5),
            Err(ConfigError::DuplicateTarget(_))
        ));
        assert!(matches!(
            TargetRegistry::new(Vec::new(), 5),
            Err(ConfigError::NoTargets)
        ));
    }

    #[test]
    fn records_latest_history_and_peak() {
        let registry = TargetRegistry::new(vec![info("a"), info("b")], 2).unwrap();

        let first = registry
            .record_server_point("a", Sample::value(1, 5), Some("1.21".into()))
            .unwrap();
        assert_eq!(first.new_peak, Some(Sample::value(1, 5)));
        assert_eq!(first.version.as_deref(), Some("1.21"));

        let lower = registry
            .record_server_point("a", Sample::value(2, 3), None)
            .unwrap();
        assert_eq!(lower.new_peak, None);
        assert_eq!(lower.version.as_deref(), Some("1.21"));

        let failed = registry
            .record_server_point("a", Sample::error(3, "timeout"), None)
            .unwrap();
        assert_eq!(failed.new_peak, None);

        let a = registry.get("a").unwrap();
        assert_eq!(a.latest(), Some(Sample::error(3, "timeout")));
        assert_eq!(a.peak(), Some(Sample::value(1, 5)));
        assert_eq!(
            a.ping_history().samples,
            vec![Sample::value(2, 3), Sample::error(3, "timeout")]
        );

        assert!(registry.get("b").unwrap().latest().is_none());
        assert!(registry
            .record_server_point("missing", Sample::value(1, 1), None)
            .is_none());
    }

    #[test]
    fn observed_outcome_is_latest_before_it_joins_history() {
        let registry = TargetRegistry::new(vec![info("a")], 4).unwrap();
        let sample = Sample::value(7, 12);

        assert!(registry.observe_server_point("a", &sample, Some("1.21")));
        let a = registry.get("a").unwrap();
        assert_eq!(a.latest(), Some(sample.clone()));
        assert_eq!(a.public_data().version.as_deref(), Some("1.21"));
        assert!(a.ping_history().samples.is_empty());
        assert_eq!(a.peak(), None);

        let update = registry.record_server_point("a", sample.clone(), None).unwrap();
        assert_eq!(update.new_peak, Some(sample.clone()));
        assert_eq!(a.ping_history().samples, vec![sample]);

        assert!(!registry.observe_server_point("missing", &Sample::value(1, 1), None));
    }

    #[test]
    fn public_data_keeps_configuration_order() {
        let registry = TargetRegistry::new(vec![info("z"), info("a")], 2).unwrap();
        let ids: Vec<_> = registry
            .public_data()
            .into_iter()
            .map(|t| t.info.id)
            .collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    #[test]
    fn apply_records_seeds_known_targets() {
        let registry = TargetRegistry::new(vec![info("a")], 2).unwrap();
        let mut records = BTreeMap::new();
        records.insert(
            "a".to_string(),
            TargetRecord {
                latest: Some(Sample::value(10, 4)),
                peak: Some(Sample::value(5, 40)),
            },
        );
        records.insert("gone".to_string(), TargetRecord::default());

        assert_eq!(registry.apply_records(&records), 1);
        let a = registry.public_data().remove(0);
        assert_eq!(a.latest, Some(Sample::value(10, 4)));
        assert_eq!(a.peak, Some(Sample::value(5, 40)));
        // History only holds samples from this process.
        assert!(registry.ping_history()[0].samples.is_empty());

        // A lower reading does not replace the stored peak.
        let update = registry
            .record_server_point("a", Sample::value(20, 39), None)
            .unwrap();
        assert_eq!(update.new_peak, None);
    }

    #[test]
    fn concurrent_readers_never_see_partial_samples() {
        let registry = Arc::new(TargetRegistry::new(vec![info("a")], 8).unwrap());

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 1..=5_000u64 {
                    // Timestamp and value always move together.
                    registry.record_server_point("a", Sample::value(i, i), None);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        for target in registry.public_data() {
                            if let Some(latest) = target.latest {
                                assert_eq!(Some(latest.timestamp_ms), latest.reading.value());
                            }
                            if let Some(peak) = target.peak {
                                assert_eq!(Some(peak.timestamp_ms), peak.reading.value());
                            }
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(
            registry.get("a").unwrap().latest(),
            Some(Sample::value(5_000, 5_000))
        );
    }
}
