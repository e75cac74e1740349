use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::series::{MetricKind, SeriesStorage};
use crate::snapshot::{SeriesSnapshot, Snapshot};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
}

type SeriesKey = (MetricId, TagSet);

/// Thread-safe store of metric definitions and their per-tag-set series.
#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<Arc<str>, MetricId, ahash::RandomState>,
    storage: DashMap<SeriesKey, Arc<SeriesStorage>, ahash::RandomState>,
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a metric. Registering an existing name with the same kind returns its id.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        if !valid_name(name) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let mut defs = self.defs.write();
        if let Some(id) = self.by_name.get(name).map(|r| *r.value()) {
            let existing = defs[id.0 as usize].kind;
            if existing != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing,
                    requested: kind,
                });
            }
            return Ok(id);
        }

        let id = MetricId(defs.len() as u32);
        let name: Arc<str> = Arc::from(name);
        defs.push(MetricDef {
            name: name.clone(),
            kind,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let id = *self.by_name.get(name)?.value();
        let kind = self.defs.read().get(id.0 as usize)?.kind;
        Some((id, kind))
    }

    pub fn kind(&self, id: MetricId) -> Option<MetricKind> {
        self.defs.read().get(id.0 as usize).map(|d| d.kind)
    }

    fn def(&self, id: MetricId) -> Result<(Arc<str>, MetricKind)> {
        let defs = self.defs.read();
        let def = defs
            .get(id.0 as usize)
            .ok_or_else(|| Error::UnknownMetric(id.to_string()))?;
        Ok((def.name.clone(), def.kind))
    }

    fn series(&self, id: MetricId, kind: MetricKind, tags: TagSet) -> Result<Arc<SeriesStorage>> {
        let key = (id, tags);
        if let Some(existing) = self.storage.get(&key) {
            return Ok(existing.value().clone());
        }
        let created = Arc::new(SeriesStorage::new(kind)?);
        Ok(self.storage.entry(key).or_insert(created).value().clone())
    }

    /// Resolves a series once so hot paths can record without map lookups.
    pub fn handle(&self, id: MetricId, tags: TagSet) -> Result<SeriesHandle> {
        let (name, kind) = self.def(id)?;
        let series = self.series(id, kind, tags)?;
        Ok(SeriesHandle { name, series })
    }

    pub fn ingest(&self, sample: &Sample) -> Result<()> {
        let (id, kind) = self
            .lookup(sample.metric())
            .ok_or_else(|| Error::UnknownMetric(sample.metric().to_string()))?;
        let value = sample.value();
        check_value(sample.metric(), kind, value)?;
        self.series(id, kind, sample.tags().clone())?.record(value);
        Ok(())
    }

    /// Copies every series. Safe to call while other threads keep ingesting.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let names: Vec<Arc<str>> = self.defs.read().iter().map(|d| d.name.clone()).collect();

        let live: Vec<(SeriesKey, Arc<SeriesStorage>)> = self
            .storage
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut series = Vec::with_capacity(live.len());
        for ((id, tags), storage) in live {
            let Some(name) = names.get(id.0 as usize) else {
                continue;
            };
            series.push(SeriesSnapshot {
                name: name.clone(),
                kind: storage.kind(),
                tags,
                values: storage.snapshot()?,
            });
        }
        Ok(Snapshot::new(series))
    }
}

/// Pre-resolved `(metric, tags)` series.
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    name: Arc<str>,
    series: Arc<SeriesStorage>,
}

impl SeriesHandle {
    pub fn kind(&self) -> MetricKind {
        self.series.kind()
    }

    pub fn record(&self, value: f64) -> Result<()> {
        check_value(&self.name, self.series.kind(), value)?;
        self.series.record(value);
        Ok(())
    }
}

/// Values must be finite; trends are durations and sizes, so they also must not be negative.
fn check_value(name: &str, kind: MetricKind, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::NonFinite {
            name: name.to_string(),
            value,
        });
    }
    if kind == MetricKind::Trend && value < 0.0 {
        return Err(Error::NegativeTrend {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}
