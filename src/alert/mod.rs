//! Alerting: rule table synchronization, batch evaluation and event emission
//!
//! ```text
//! RuleStore ──(every sync interval)──> RuleSynchronizer ──store──> SharedRules
//!                                                                      │ load
//! dispatcher ──> AlertEngine: batch ──> QueryEvaluator ──> HistoryStore ──> ThresholdFunction
//!                                                                      │ triggered
//!                                                                  EventSink (event:p{priority})
//! ```

pub mod engine;
pub mod sink;
pub mod sync;

pub use engine::{AlertEngine, TickReport};
pub use sink::{queue_name, ChannelEventSink, EventSink, RedisEventSink};
pub use sync::{RuleSynchronizer, RuleTable, RuleTableSummary, SharedRules};
