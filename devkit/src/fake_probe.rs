/*!
Sonde scriptable pour tester le kernel sans matériel

Chaque type suit un comportement programmable (succès, échec transitoire,
capteur absent, appel bloqué) et chaque appel est compté pour les assertions.
*/

use parking_lot::Mutex;
use pulse_kernel::error::ProbeError;
use pulse_kernel::models::{FieldValue, Fields, MetricKind};
use pulse_kernel::sampler::{InterfaceAddress, NetworkInfo, Probe};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Renvoie `{"seq": n, "usage": n}` où n est le numéro d'appel
    Ok,
    Fail(String),
    Unavailable(String),
    /// Bloque le thread puis réussit
    Hang(Duration),
}

#[derive(Default)]
struct FakeState {
    behaviors: HashMap<MetricKind, Behavior>,
    calls: HashMap<MetricKind, u64>,
    fact_calls: HashMap<MetricKind, u64>,
}

/// Clone = même état partagé, on garde une poignée pendant que le kernel possède l'autre
#[derive(Clone, Default)]
pub struct FakeProbe {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: MetricKind, behavior: Behavior) -> &Self {
        self.state.lock().behaviors.insert(kind, behavior);
        self
    }

    pub fn calls(&self, kind: MetricKind) -> u64 {
        self.state.lock().calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn fact_calls(&self, kind: MetricKind) -> u64 {
        self.state.lock().fact_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.state.lock().calls.values().sum()
    }

    /// Remet les compteurs à zéro sans toucher aux comportements
    pub fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.fact_calls.clear();
    }
}

impl Probe for FakeProbe {
    fn probe(&self, kind: MetricKind) -> Result<Fields, ProbeError> {
        let (seq, behavior) = {
            let mut state = self.state.lock();
            let seq = {
                let calls = state.calls.entry(kind).or_insert(0);
                *calls += 1;
                *calls
            };
            (seq, state.behaviors.get(&kind).cloned().unwrap_or(Behavior::Ok))
        };

        match behavior {
            Behavior::Ok => Ok(sequence_fields(seq)),
            Behavior::Fail(msg) => Err(ProbeError::Transient(msg)),
            Behavior::Unavailable(msg) => Err(ProbeError::Unavailable(msg)),
            Behavior::Hang(duration) => {
                // verrou relâché : les autres types continuent pendant le blocage
                std::thread::sleep(duration);
                Ok(sequence_fields(seq))
            }
        }
    }

    fn static_facts(&self, kind: MetricKind) -> Result<Fields, ProbeError> {
        *self.state.lock().fact_calls.entry(kind).or_insert(0) += 1;
        let mut fields = Fields::new();
        fields.insert("model".into(), FieldValue::Text(format!("fake-{kind}")));
        Ok(fields)
    }

    /// Une adresse de documentation (RFC 5737), ou l'échec scripté pour `Network`
    fn network_info(&self) -> Result<NetworkInfo, ProbeError> {
        match self.state.lock().behaviors.get(&MetricKind::Network) {
            Some(Behavior::Fail(msg)) => return Err(ProbeError::Transient(msg.clone())),
            Some(Behavior::Unavailable(msg)) => return Err(ProbeError::Unavailable(msg.clone())),
            _ => {}
        }
        Ok(NetworkInfo {
            addresses: vec![InterfaceAddress {
                interface: "fake0".into(),
                address: "192.0.2.10".into(),
            }],
            hostname: "fake-host".into(),
            platform: "test".into(),
        })
    }
}

fn sequence_fields(seq: u64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("seq".into(), FieldValue::Number(seq as f64));
    fields.insert("usage".into(), FieldValue::Number((seq % 100) as f64));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_behaviors() {
        let probe = FakeProbe::new();
        probe
            .set(MetricKind::Gpu, Behavior::Unavailable("no gpu".into()))
            .set(MetricKind::Disk, Behavior::Fail("io".into()));

        let first = probe.probe(MetricKind::Cpu).unwrap();
        let second = probe.probe(MetricKind::Cpu).unwrap();
        assert_eq!(first["seq"], FieldValue::Number(1.0));
        assert_eq!(second["seq"], FieldValue::Number(2.0));
        assert_eq!(
            probe.probe(MetricKind::Gpu),
            Err(ProbeError::Unavailable("no gpu".into()))
        );
        assert!(matches!(probe.probe(MetricKind::Disk), Err(ProbeError::Transient(_))));

        assert_eq!(probe.calls(MetricKind::Cpu), 2);
        assert_eq!(probe.total_calls(), 4);
        probe.reset_calls();
        assert_eq!(probe.total_calls(), 0);
    }
}
