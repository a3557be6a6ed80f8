//! Packet-type demultiplexer and per-type handlers.

use crate::broker::session::Session;
use crate::protocol::{ControlPacket, SubAckPacket, SubscribePacket, QOS_AT_MOST_ONCE};
use std::sync::Arc;

// Fixed response frame reused across all sessions.
const PINGRESP_PACKET: ControlPacket = ControlPacket::PingResp;

/// Envelope pairing a source session with a decoded inbound packet. Lives
/// only between the read loop and worker execution.
pub struct Message {
    pub session: Arc<Session>,
    pub packet: Arc<ControlPacket>,
}

impl Message {
    pub fn new(session: Arc<Session>, packet: ControlPacket) -> Self {
        Self {
            session,
            packet: Arc::new(packet),
        }
    }
}

/// Route one inbound packet to its handler. Runs on the client's worker
/// slot, so packets from one session are handled in arrival order.
pub async fn process_message(msg: Message) {
    let session = &msg.session;
    match msg.packet.as_ref() {
        ControlPacket::Publish(_) => process_publish(session, &msg.packet).await,
        ControlPacket::Subscribe(subscribe) => process_subscribe(session, subscribe).await,
        ControlPacket::PingReq => process_ping(session).await,
        ControlPacket::Disconnect => session.close().await,
        // Accepted silently: no QoS bookkeeping is performed, and frames
        // that only matter to stateful flows carry no action here.
        ControlPacket::Connect(_)
        | ControlPacket::ConnAck(_)
        | ControlPacket::PubAck(_)
        | ControlPacket::PubRec(_)
        | ControlPacket::PubRel(_)
        | ControlPacket::PubComp(_)
        | ControlPacket::SubAck(_)
        | ControlPacket::Unsubscribe(_)
        | ControlPacket::UnsubAck(_)
        | ControlPacket::PingResp => {}
    }
}

/// Deliver a PUBLISH to every registered peer except the source and any
/// publish-only session. The packet value is shared across all deliveries;
/// encoding never mutates it. A failed delivery is logged by the registry
/// and never halts the fan-out.
async fn process_publish(session: &Arc<Session>, packet: &Arc<ControlPacket>) {
    if !session.is_connected() {
        return;
    }
    let source_id = session.id().to_string();
    session
        .registry()
        .for_each(|peer| {
            let packet = packet.clone();
            let source_id = source_id.clone();
            async move {
                if peer.id() == source_id || peer.is_publish_only() {
                    return Ok(());
                }
                peer.send(&packet).await?;
                Ok(())
            }
        })
        .await;
}

async fn process_subscribe(session: &Arc<Session>, subscribe: &SubscribePacket) {
    if !session.is_connected() {
        return;
    }
    // Topic filters are not stored; every requested filter is granted QoS 0
    // and publish traffic remains a broadcast.
    let suback = ControlPacket::SubAck(SubAckPacket {
        message_id: subscribe.message_id,
        return_codes: vec![QOS_AT_MOST_ONCE; subscribe.topics.len()],
    });
    if let Err(err) = session.send(&suback).await {
        tracing::error!(client_id = %session.id(), "send suback: {err}");
    }
}

async fn process_ping(session: &Arc<Session>) {
    if !session.is_connected() {
        return;
    }
    if let Err(err) = session.send(&PINGRESP_PACKET).await {
        tracing::error!(client_id = %session.id(), "send pingresp: {err}");
    }
}
