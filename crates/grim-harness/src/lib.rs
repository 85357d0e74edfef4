//! Session orchestration for the clocktower test harness.
//!
//! Drives one live session end to end (provision, subscribe, trigger,
//! collect, reconcile), persists run results, renders reports and
//! comparisons, and runs the narrator benchmark against LLM providers.

pub mod bench;
pub mod report;
pub mod result;
pub mod session;

pub use bench::{
    bench_summary, default_scenarios, render_bench, run_provider_bench, save_bench, ProviderBench,
    Scenario, Trial,
};
pub use report::{render_comparison, render_events, render_report};
pub use result::{ChatLine, RunResult};
pub use session::{run_session, SessionConfig, SessionReport};
