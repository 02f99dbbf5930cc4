//! Mirar: browser interaction and visual-regression test harness
//!
//! Mirar (Spanish: "to look at") drives a web page the way a user would
//! (type, click, focus, blur, clear, submit, scroll) and records named visual
//! checkpoints that are compared against stored baselines in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  SessionController ── open ──► TestContext ── get ──► Subject     │
//! │        │                           │                    │        │
//! │        │ close (joins)             │ check_window       │ action │
//! │        ▼                           ▼                    ▼        │
//! │  VisualBackend ◄── compare ── CheckpointRecorder   ActionExecutor │
//! │  (BaselineStore)                   │                    │        │
//! │                                    └──── PageDriver ◄───┘        │
//! │                         (SimulatedPage | CdpDriver)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A test body runs inside [`SessionController::run`], which always closes
//! the visual session, even when the body fails or panics.

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod action;
mod assertion;
mod checkpoint;
mod config;
mod context;
mod driver;
mod keyboard;
mod locator;
mod result;
mod session;
mod visual_regression;

/// Simulated pages for running the harness without a browser
pub mod sim;

/// The actions demo page and its routing
pub mod demo;

/// Subscriber setup for test binaries
pub mod logging;

/// CDP browser driver
#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::significant_drop_tightening)]
mod browser;

pub use action::{ActionExecutor, ActionOptions};
pub use assertion::{Expectation, Predicate};
#[cfg(feature = "browser")]
pub use browser::{BrowserOptions, CdpDriver};
pub use checkpoint::{Checkpoint, CheckpointRecorder, CheckpointTarget};
pub use config::{
    HarnessConfig, VisualConfig, DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    ENV_BASE_URL, ENV_UPDATE_BASELINES,
};
pub use context::{Subject, TestContext};
pub use driver::{ElementHandle, ElementId, ElementState, PageDriver, Screenshot, Sibling, Size};
pub use keyboard::{keystrokes, parse_keys, KeyInput, KeyToken, Modifier, Modifiers, SpecialKey};
pub use locator::{resolve, BoundingBox, Locator, NamedPoint, Point, Resolution};
pub use result::{MirarError, MirarResult};
pub use session::{SessionController, SessionState, SessionSummary, TestReport};
pub use sim::SimulatedPage;
pub use visual_regression::{
    BaselineStore, CheckpointOutcome, CheckpointResult, ComparisonRequest, ImageComparer,
    ImageDiffResult, MaskRegion, SessionVerdict, VisualBackend,
};

/// Commonly used types for writing test bodies
pub mod prelude {
    pub use crate::{
        ActionOptions, Checkpoint, Expectation, HarnessConfig, Locator, MirarError, MirarResult,
        NamedPoint, SessionController, Subject, TestContext, TestReport,
    };
}
