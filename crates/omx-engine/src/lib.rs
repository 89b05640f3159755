//! Order lifecycle and risk core for the omx market maker.
//!
//! Components, composed leaves-first:
//! - `rate_limit`: per-venue backoff gating every control cycle
//! - `coordinator`: at-most-one in-flight operation per logical order slot,
//!   with slippage and precision guards
//! - `plan`: reconciles desired quotes against live open orders
//! - `orphan`: protective close for positions with no working protection
//! - `stop`: protective-stop pricing and replacement policy
//! - `imbalance`: top-of-book depth imbalance measurement
//! - `engine`: the control loop tying it all together

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod imbalance;
pub mod orphan;
pub mod plan;
pub mod rate_limit;
pub mod snapshot;
pub mod stop;
pub mod trade_log;

pub use config::{EngineConfig, StrategyMode};
pub use coordinator::{OrderCoordinator, Precision, PriceGuard, Slot};
pub use engine::StrategyEngine;
pub use error::{EngineError, EngineResult};
pub use imbalance::{DepthImbalance, ImbalanceLabel};
pub use plan::{make_order_plan, OrderPlan};
pub use rate_limit::{CycleDecision, RateLimitController};
pub use snapshot::{EngineSnapshot, FeedStatus};
pub use trade_log::{LogLevel, TradeLog, TradeLogEntry};
