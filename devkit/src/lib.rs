/*!
# Pulse DevKit - Outils de test pour le kernel

- FakeProbe : sonde scriptable (succès, échec, capteur absent, blocage) avec compteurs d'appels
- TestHarness : kernel complet sur SQLite en mémoire avec cadences courtes
- wait_until : attente à échéance pour les assertions asynchrones
*/

pub mod fake_probe;
pub mod harness;

pub use fake_probe::{Behavior, FakeProbe};
pub use harness::{fast_cadence, fast_options, wait_until, TestHarness, FAST_PERIOD};
