//! Latest value per (target, field), exposed in the Prometheus text format.
//!
//! Every exportable field gets one `IntGaugeVec` labelled by target. An update
//! writes all of a result's fields under the write lock and a scrape gathers
//! under the read lock, so a scrape sees each target either entirely before or
//! entirely after a given result.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::RegistryError;
use crate::probe::fields::{self, FieldDesc};
use crate::probe::result::ProbeResult;

pub mod exporter;

const NAMESPACE: &str = "oxyprobe";
const TARGET_LABEL: &str = "target";

pub struct MetricsRegistry {
    registry: Registry,
    gauges: Vec<(&'static FieldDesc, IntGaugeVec)>,
    /// Targets reported so far. Also the lock that makes updates atomic.
    targets: RwLock<HashSet<String>>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        let registry = Registry::new();
        let mut gauges = Vec::new();

        for field in fields::exportable() {
            let opts = Opts::new(field.snake_name(), field.help).namespace(NAMESPACE);
            let gauge = IntGaugeVec::new(opts, &[TARGET_LABEL])?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push((field, gauge));
        }

        Ok(MetricsRegistry {
            registry,
            gauges,
            targets: RwLock::new(HashSet::new()),
        })
    }

    /// Replaces the target's values with those of `result`.
    pub fn update(&self, result: &ProbeResult) {
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        if !targets.contains(&result.target) {
            targets.insert(result.target.clone());
        }

        for (field, gauge) in &self.gauges {
            if let Some(value) = (field.get)(result).as_i64() {
                gauge.with_label_values(&[result.target.as_str()]).set(value);
            }
        }
    }

    /// Current contents in the text exposition format.
    pub fn render(&self) -> Result<String, RegistryError> {
        let families = {
            let _targets = self.targets.read().unwrap_or_else(PoisonError::into_inner);
            self.registry.gather()
        };

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Last value recorded for `field` on `target`.
    #[cfg(test)]
    pub fn value(&self, target: &str, field: &str) -> Option<i64> {
        let targets = self.targets.read().unwrap_or_else(PoisonError::into_inner);
        if !targets.contains(target) {
            return None;
        }
        self.gauges
            .iter()
            .find(|(desc, _)| desc.name == field)
            .map(|(_, gauge)| gauge.with_label_values(&[target]).get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::filter::tests::sample;

    #[test]
    fn latest_value_wins() {
        let registry = MetricsRegistry::new().unwrap();
        let mut result = sample();
        for retransmits in [3, 7, 2] {
            result.snapshot.retransmits = retransmits;
            registry.update(&result);
        }
        assert_eq!(registry.value("example", "Retransmits"), Some(2));
    }

    #[test]
    fn unknown_target_or_field_has_no_value() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&sample());
        assert_eq!(registry.value("other", "Rtt"), None);
        assert_eq!(registry.value("example", "TCPCongesAlg"), None);
        assert_eq!(registry.value("example", "Rtt"), Some(1234));
    }

    #[test]
    fn exposition_skips_non_exportable_fields() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&sample());
        let text = registry.render().unwrap();

        assert!(text.contains("# HELP oxyprobe_rtt smoothed round trip time"));
        assert!(text.contains("oxyprobe_rtt{target=\"example\"} 1234"));
        assert!(text.contains("oxyprobe_http_status_code{target=\"example\"} 200"));
        assert!(text.contains("oxyprobe_tcp_connect_error{target=\"example\"} 1"));
        assert!(!text.contains("conges_alg"));
    }

    #[test]
    fn targets_are_kept_apart() {
        let registry = MetricsRegistry::new().unwrap();
        let mut a = sample();
        a.target = "a".to_string();
        a.snapshot.snd_cwnd = 10;
        let mut b = sample();
        b.target = "b".to_string();
        b.snapshot.snd_cwnd = 20;
        registry.update(&a);
        registry.update(&b);

        assert_eq!(registry.value("a", "SndCwnd"), Some(10));
        assert_eq!(registry.value("b", "SndCwnd"), Some(20));
    }
}
