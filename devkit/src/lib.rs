/*!
# secbridge DevKit - Stubs et utilitaires de test

Permet d'exercer le moteur de réconciliation sans Livestatus ni MantisBT :
- `MockTracker` : tracker en mémoire qui enregistre chaque appel
- `MockMonitoring` : lignes de supervision scriptées, par sévérité
- `TestHarness` : moteur complet branché sur les deux stubs et une base en mémoire
*/

pub mod monitoring_stub;
pub mod test_utils;
pub mod tracker_stub;

pub use monitoring_stub::{row, MockMonitoring, RecordedQuery};
pub use test_utils::TestHarness;
pub use tracker_stub::{MockTracker, TrackerCall, STATUS_NEW, STATUS_RESOLVED};
