//! Streaming session manager.
//!
//! A [`StreamSession`] runs in its own task and publishes through an
//! [`EventPublisher`] into a [`StreamChannel`]; the [`SessionRegistry`] keeps
//! the current channel per conversation and [`relay_events`] drains it for a
//! subscriber.
//!
//! ```text
//! start_stream ─► SessionRegistry ─► spawn(StreamSession) ─► EventPublisher
//!                        │                                        │
//!                        ▼                                        ▼
//!  GET /events ─► relay_events ◄──────── pop ───────────── StreamChannel
//! ```

pub mod channel;
pub mod endpoint;
pub mod registry;
pub mod session;

pub use channel::{EventPublisher, PopError, StreamChannel};
pub use endpoint::{relay_events, RelayConfig};
pub use registry::SessionRegistry;
pub use session::{chunk_text, SessionConfig, SessionOutcome, StreamSession};
