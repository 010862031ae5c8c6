//! Discord gateway adapter for the bridge.
//!
//! Wraps serenity: the event handler translates gateway callbacks into
//! [`GatewayEvent`]s, and [`DiscordTransport`] implements the outbound
//! client and cache-directory traits over serenity's HTTP and cache
//! handles.

mod handler;
mod transport;

pub use transport::DiscordTransport;
