//! Per-connection dispatch loops.
//!
//! One loop per network consumes that adapter's event stream, pattern-
//! matches on the variant, and forwards to the bridge core. Handlers
//! tolerate interleaving across the two loops; only the edit/delete
//! ordering relative to the original send matters, and that is preserved
//! per stream.

use std::sync::Arc;

use {
    tokio::sync::mpsc::UnboundedReceiver,
    tracing::{debug, info, warn},
};

use {trestle_common::types::NetworkSide, trestle_recovery::RecoveryEvent};

use crate::{
    event::{GatewayEvent, LineEvent},
    relay::Bridge,
};

pub async fn gateway_loop(bridge: Arc<Bridge>, mut rx: UnboundedReceiver<GatewayEvent>) {
    loop {
        let event = tokio::select! {
            () = bridge.cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            GatewayEvent::Ready => {
                info!("connected to discord");
                bridge.recovery.record_success(NetworkSide::Gateway);
                let started = trestle_common::now_ms().to_string();
                if let Err(e) = bridge.store.save_metric("uptime_start", &started).await {
                    warn!(error = %e, "failed to persist uptime marker");
                }
            },
            GatewayEvent::Message(msg) => bridge.route_from_gateway(*msg).await,
            GatewayEvent::MessageEdit(msg) => bridge.handle_gateway_edit(*msg).await,
            GatewayEvent::MessageDelete { id } => bridge.handle_gateway_delete(&id).await,
            GatewayEvent::MessageDeleteBulk { ids } => {
                bridge.handle_gateway_delete_bulk(&ids).await;
            },
            GatewayEvent::TransportError(error) => {
                warn!(%error, "discord transport error");
                bridge.metrics.record_connection_error();
                bridge.recovery.record_failure(NetworkSide::Gateway, &error);
            },
            GatewayEvent::Disconnected(reason) => {
                warn!(%reason, "discord disconnected");
                bridge.recovery.record_failure(NetworkSide::Gateway, &reason);
            },
        }
    }
    debug!("gateway dispatch loop stopped");
}

pub async fn line_loop(bridge: Arc<Bridge>, mut rx: UnboundedReceiver<LineEvent>) {
    loop {
        let event = tokio::select! {
            () = bridge.cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            LineEvent::Registered => {
                info!("connected to irc");
                bridge.recovery.record_success(NetworkSide::Line);
            },
            LineEvent::Message {
                from,
                channel,
                text,
            } => bridge.route_from_line(&from, &channel, &text).await,
            LineEvent::Notice {
                from,
                channel,
                text,
            } => {
                bridge
                    .route_from_line(&from, &channel, &format!("*{text}*"))
                    .await;
            },
            LineEvent::Action {
                from,
                channel,
                text,
            } => {
                bridge
                    .route_from_line(&from, &channel, &format!("_{text}_"))
                    .await;
            },
            LineEvent::PrivateMessage { from, text } => bridge.handle_line_pm(&from, &text).await,
            LineEvent::Join { channel, nick } => bridge.handle_line_join(&channel, &nick).await,
            LineEvent::Part {
                channel,
                nick,
                reason,
            } => bridge.handle_line_part(&channel, &nick, &reason).await,
            LineEvent::Quit {
                nick,
                reason,
                channels,
            } => bridge.handle_line_quit(&nick, &reason, &channels).await,
            LineEvent::Nick {
                old_nick,
                new_nick,
                channels,
            } => {
                bridge
                    .handle_line_nick(&old_nick, &new_nick, &channels)
                    .await;
            },
            LineEvent::Names { channel, nicks } => {
                bridge.handle_line_names(&channel, nicks).await;
            },
            LineEvent::Invite { channel, from } => {
                bridge.handle_line_invite(&channel, &from).await;
            },
            LineEvent::TransportError(error) => {
                warn!(%error, "irc transport error");
                bridge.metrics.record_connection_error();
                bridge.recovery.record_failure(NetworkSide::Line, &error);
            },
            LineEvent::Closed(reason) => {
                warn!(%reason, "irc connection closed");
                bridge.recovery.record_failure(NetworkSide::Line, &reason);
            },
        }
    }
    debug!("line dispatch loop stopped");
}

/// Log recovery notifications as they arrive. The recovery manager already
/// drives reconnection; this loop only narrates it.
pub async fn recovery_loop(bridge: Arc<Bridge>, mut rx: UnboundedReceiver<RecoveryEvent>) {
    loop {
        let event = tokio::select! {
            () = bridge.cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            RecoveryEvent::Degraded { service, error } => {
                warn!(%service, %error, "recovery started");
            },
            RecoveryEvent::AttemptFailed {
                service,
                attempt,
                error,
            } => {
                warn!(%service, attempt, %error, "recovery attempt failed");
            },
            RecoveryEvent::Recovered { service } => info!(%service, "recovery succeeded"),
            RecoveryEvent::CircuitOpened { service, failures } => {
                warn!(%service, failures, "circuit breaker open");
            },
            RecoveryEvent::CircuitClosed { service } => info!(%service, "circuit breaker closed"),
            RecoveryEvent::CircuitReset { service } => info!(%service, "circuit breaker reset"),
            RecoveryEvent::Silent { service, silent_for } => {
                warn!(%service, silent_secs = silent_for.as_secs(), "service has gone silent");
            },
        }
    }
    debug!("recovery event loop stopped");
}
