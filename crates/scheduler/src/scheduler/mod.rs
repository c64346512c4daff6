//! Public entry point tying the queue, the idle driver and the worker pool
//! together.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructors, ticking and accessors
//! - `idle`: idle submissions, cancellation and synchronous windows
//! - `background`: background submissions and their continuations
//! - `conditional`: condition-gated idle tasks and block/pump helpers

mod background;
mod conditional;
mod core;
mod idle;

pub use self::core::Scheduler;
pub use self::idle::SynchronousWindow;
