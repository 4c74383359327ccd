//! tether-pty: the PTY transport used by the tether session coordinator.
//!
//! # Architecture
//!
//! - [`PtyTransport`]: The transport contract: create, connect, input, resize, close.
//! - [`PtyHandle`]: Low-level PTY process management (spawn, read, write, resize).
//! - [`LocalSession`]: A `PtyHandle` plus the read thread that publishes its output.
//! - [`Multiplexer`]: Owns every `LocalSession`, keyed by session id.
//! - [`LocalTransport`]: `PtyTransport` over a `Multiplexer`, replaying missed output to lagging streams.

pub mod decode;
pub mod local;
pub mod multiplexer;
pub mod pty;
pub mod session;
pub mod transport;

pub use local::LocalTransport;
pub use multiplexer::Multiplexer;
pub use pty::{PtyError, PtyHandle};
pub use session::{LocalSession, PtyOutput};
pub use transport::{
    ConnectOptions, CreateSession, PtyTransport, SessionId, StreamEvent, StreamMessage,
    StreamPayload, StreamSink, Subscription, SubscriptionId, TransportError,
};
