// transit: Transport-agnostic bidirectional messaging framework.
//
// Exposes the messaging pipeline: a length-
// prefixed wire codec (`transit-protocol`, re-exported here), an incremental
// `Reader`, an outbound `Writer` with ack/operation timeouts and resumption,
// a typed `Emitter` send/on facade, and the `ClientController` /
// `ServerConnectionController` pair that wires all of the above to a
// pluggable `transport`.
//
// A host application brings its own transport (a WebSocket adapter, most
// commonly) implementing the traits in `transport`; this crate never
// constructs a socket itself.

pub mod completion;
pub mod config;
pub mod controller;
pub mod emitter;
pub mod error;
pub mod observer;
pub mod reader;
pub mod transport;
pub mod writer;

pub use completion::Completion;
pub use config::{Config, ConfigBuilder, ConfigError};
pub use controller::{ClientController, ControllerEvent, ServerConnectionController};
pub use emitter::{Emitter, HandlerId};
pub use error::{
    DecodeErrorKind, FramingError, NetworkError, NetworkTimeoutError, ReaderError, RequestError,
    TransportError,
};
pub use observer::{ListenerId, Observer};
pub use reader::Reader;
pub use transport::{
    ClientTransport, ServerConnectionTransport, ServerTransport, ServerTransportEvent,
    TransportEvent, TransportEventReceiver, TransportEventSender,
};
pub use writer::{QueueOptions, TimerEvent, Writer};

pub use transit_protocol::{
    decode, encode, system_channel, DecodeError, EncodeError, Message, MessageId, MessageKind,
    Payload, ResponseEnvelope,
};
