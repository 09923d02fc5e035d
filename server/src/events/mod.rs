pub mod router;

pub use router::{EmitOptions, EventRouter, HandlerFuture, InboundEvent};
