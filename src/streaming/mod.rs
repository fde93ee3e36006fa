//! Streaming window management and segment arbitration.
//!
//! ```text
//! resampled audio ──▶ StreamingWindow ──window──▶ ASR ──segments──▶ HoldEmitArbiter ──▶ emit
//!                          │ slide()                                     │
//!                          └── keeps overlap tail                        └── held queue + watermark
//! ```
//!
//! The window accumulates 16kHz audio into fixed-duration buffers with
//! overlap; the arbiter decides, per ASR segment, whether to emit now, hold
//! for the next window, or drop as a duplicate of already-emitted output.

pub mod arbiter;
pub mod window;

pub use arbiter::{HoldEmitArbiter, PendingSegment};
pub use window::{StreamingWindow, WindowView};
