//! Walk-forward validation: the sequential date loop, the append-only
//! ledger, and calibration scoring.

pub mod calibration;
pub mod ledger;
pub mod walkforward;

pub use calibration::{calibration_report, CalibrationReport, ReliabilityBin, RoiPoint};
pub use ledger::{BacktestRecord, Ledger};
pub use walkforward::{matchup_from_observation, MarketData, WalkForwardValidator};
