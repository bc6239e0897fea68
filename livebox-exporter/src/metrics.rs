//! In-process metrics registry rendered in the Prometheus text format.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    fn as_str(self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
        }
    }
}

/// Static description of a metric family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    pub metric_type: MetricType,
    pub labels: &'static [&'static str],
}

impl MetricDesc {
    pub const fn gauge(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            metric_type: MetricType::Gauge,
            labels,
        }
    }

    pub const fn counter(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            metric_type: MetricType::Counter,
            labels,
        }
    }
}

type LabelSet = Vec<(String, String)>;

#[derive(Debug)]
struct Family {
    desc: MetricDesc,
    series: BTreeMap<LabelSet, f64>,
}

impl Family {
    fn accepts(&self, labels: &[(&str, &str)]) -> bool {
        labels.len() == self.desc.labels.len()
            && labels
                .iter()
                .all(|(k, _)| self.desc.labels.iter().any(|l| l == k))
    }
}

/// Latest value of every series, keyed by metric name then label set.
///
/// Writers to different series never interfere; a series keeps its last
/// value until it is overwritten or its family is reset.
#[derive(Debug, Default)]
pub struct Registry {
    families: RwLock<BTreeMap<&'static str, Family>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a family. Registering the same name twice keeps the first
    /// description.
    pub fn register(&self, desc: MetricDesc) {
        let mut families = self.families.write();
        families.entry(desc.name).or_insert_with(|| Family {
            desc,
            series: BTreeMap::new(),
        });
    }

    pub fn register_all(&self, descs: impl IntoIterator<Item = MetricDesc>) {
        for desc in descs {
            self.register(desc);
        }
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(name, labels, |v| *v = value);
    }

    pub fn add_counter(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        if delta < 0.0 {
            log::warn!("Ignoring negative increment of counter {}", name);
            return;
        }
        self.update(name, labels, |v| *v += delta);
    }

    /// Overwrites a counter, for reseeding after the source counter reset.
    pub fn reset_counter(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(name, labels, |v| *v = value);
    }

    /// Replaces every series of a family at once. Series absent from
    /// `series` disappear; a scrape never sees the family half written.
    pub fn replace_family<'a>(
        &self,
        name: &str,
        series: impl IntoIterator<Item = (Vec<(&'a str, &'a str)>, f64)>,
    ) {
        let mut families = self.families.write();
        let Some(family) = families.get_mut(name) else {
            log::warn!("Metric {} is not registered, dropping observation", name);
            return;
        };

        let mut replaced = BTreeMap::new();
        for (labels, value) in series {
            if family.accepts(&labels) {
                replaced.insert(label_set(&labels), value);
            } else {
                log::warn!(
                    "Metric {} expects labels {:?}, dropping observation",
                    name,
                    family.desc.labels
                );
            }
        }
        family.series = replaced;
    }

    #[cfg(test)]
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.families.read();
        families
            .get(name)
            .and_then(|f| f.series.get(&label_set(labels)).copied())
    }

    fn update(&self, name: &str, labels: &[(&str, &str)], f: impl FnOnce(&mut f64)) {
        let mut families = self.families.write();
        match families.get_mut(name) {
            Some(family) if !family.accepts(labels) => log::warn!(
                "Metric {} expects labels {:?}, dropping observation",
                name,
                family.desc.labels
            ),
            Some(family) => f(family.series.entry(label_set(labels)).or_insert(0.0)),
            None => log::warn!("Metric {} is not registered, dropping observation", name),
        }
    }

    /// Renders every family in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let families = self.families.read();
        let mut out = String::new();

        for family in families.values() {
            let _ = writeln!(out, "# HELP {} {}", family.desc.name, escape_help(family.desc.help));
            let _ = writeln!(out, "# TYPE {} {}", family.desc.name, family.desc.metric_type.as_str());

            for (labels, value) in &family.series {
                out.push_str(family.desc.name);
                if !labels.is_empty() {
                    out.push('{');
                    for (i, (k, v)) in labels.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "{}=\"{}\"", k, escape_label(v));
                    }
                    out.push('}');
                }
                let _ = writeln!(out, " {}", format_value(*value));
            }
        }

        out
    }
}

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        v.to_string()
    }
}
