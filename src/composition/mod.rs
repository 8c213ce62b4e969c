//! # Composition
//!
//! The clip operations and the engine that runs a manifest through them:
//! open sources, select ranges, normalize depth, merge, splice, finalize.

pub mod compositor;
pub mod engine;

pub use compositor::ClipCompositor;
pub use engine::{CompositionEngine, Plan, PlanStep};
