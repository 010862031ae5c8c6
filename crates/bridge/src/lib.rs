//! Translation and routing engine between the gateway network (Discord) and
//! the line-protocol network (IRC).
//!
//! The bridge core consumes events from both network adapters, applies
//! admission control, rewrites content into the destination dialect,
//! resolves the destination channel, delivers, and registers every sent
//! line with the message synchronizer so later edits and deletes can be
//! replayed. Transport failures are reported to the recovery manager, which
//! drives reconnection independently of message flow.
//!
//! The wire clients themselves are collaborators behind the traits in
//! [`client`]; the adapters in `trestle-discord` and `trestle-irc` implement
//! them.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod format;
pub mod mapping;
pub mod metrics;
pub mod relay;
pub mod rewrite;
pub mod state;
pub mod store;

pub use {
    client::{
        AttachmentUpgrader, GatewayClient, GatewayDirectory, LineClient, MemberProfile,
        ObjectStore, ResolvedChannel, WebhookProfile,
    },
    error::{Error, Result},
    event::{GatewayAuthor, GatewayEvent, GatewayMessage, LineEvent},
    mapping::ChannelMap,
    relay::{Bridge, BridgeDeps},
    store::{BridgeStore, ThreadMapping},
};
