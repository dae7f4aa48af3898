//! Inbound control message handling.
//!
//! Each device connection owns a `ConnectionContext` and feeds every text
//! frame it receives through the shared `Dispatcher`. The dispatcher keeps
//! no per-connection state of its own; everything it learns about the
//! connection is written back into the context.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use otalink_core::DeviceStore;
use otalink_protocol::{decode_device_message, DeviceMessage, ServerMessage};
use tracing::{debug, info, warn};

use crate::link::DeviceLink;
use crate::registry::DeviceRegistry;

/// State of one device connection.
#[derive(Debug)]
pub struct ConnectionContext {
    pub addr: SocketAddr,
    pub link: DeviceLink,
    /// Identity announced on this connection, if any.
    pub identity: Option<String>,
    /// When the identity was registered.
    pub registered_at: Option<DateTime<Utc>>,
}

impl ConnectionContext {
    pub fn new(addr: SocketAddr, link: DeviceLink) -> Self {
        Self {
            addr,
            link,
            identity: None,
            registered_at: None,
        }
    }
}

/// Applies device control messages to the registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn DeviceStore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, store: Arc<dyn DeviceStore>) -> Self {
        Self { registry, store }
    }

    /// Handle one text frame. Malformed input is logged and dropped.
    pub async fn handle_text(&self, ctx: &mut ConnectionContext, text: &str) {
        match decode_device_message(text) {
            Ok(msg) => self.dispatch(ctx, msg).await,
            Err(e) => warn!("Discarding message from {}: {}", ctx.addr, e),
        }
    }

    /// Handle one decoded message.
    pub async fn dispatch(&self, ctx: &mut ConnectionContext, msg: DeviceMessage) {
        match msg {
            DeviceMessage::Register { device_id } => self.on_register(ctx, device_id).await,
            DeviceMessage::Pong => self.on_pong(ctx),
            DeviceMessage::Unknown => {
                warn!("Discarding message of unknown type from {}", ctx.addr);
            }
        }
    }

    async fn on_register(&self, ctx: &mut ConnectionContext, device_id: String) {
        if device_id.is_empty() {
            warn!("Discarding REGISTER with empty deviceId from {}", ctx.addr);
            return;
        }

        // A connection carries one identity; drop the old one if it changes.
        if let Some(previous) = ctx.identity.take() {
            if previous != device_id {
                self.registry.unregister(&previous, ctx.link.id());
                info!("{} re-announced as {} (was {})", ctx.addr, device_id, previous);
            }
        }

        if let Some(superseded) = self.registry.register(&device_id, ctx.link.clone()) {
            info!(
                "Device {} re-registered on {}, closing {}",
                device_id,
                ctx.link.id(),
                superseded.id()
            );
            superseded.close();
        }

        let now = Utc::now();
        if let Err(e) = self.store.record_registration(&device_id, now) {
            warn!("Failed to record registration of {}: {}", device_id, e);
        }
        ctx.identity = Some(device_id.clone());
        ctx.registered_at = Some(now);
        info!("Device {} registered from {}", device_id, ctx.addr);

        if let Err(e) = ctx
            .link
            .send_control(ServerMessage::Registered { device_id })
            .await
        {
            warn!("Failed to acknowledge registration to {}: {}", ctx.addr, e);
        }
    }

    fn on_pong(&self, ctx: &ConnectionContext) {
        let Some(device_id) = ctx.identity.as_deref() else {
            debug!("PONG from unregistered connection {}", ctx.addr);
            return;
        };
        self.registry.touch(device_id);
        if let Err(e) = self.store.record_seen(device_id, Utc::now()) {
            warn!("Failed to record liveness of {}: {}", device_id, e);
        }
    }

    /// Called once when the connection has closed, whatever the cause.
    pub fn on_close(&self, ctx: &ConnectionContext) {
        let Some(device_id) = ctx.identity.as_deref() else {
            return;
        };
        if self.registry.unregister(device_id, ctx.link.id()) {
            info!("Device {} unregistered", device_id);
        } else {
            debug!(
                "Device {} already re-registered elsewhere, keeping entry",
                device_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Frame;
    use crate::test_support::{drain, spawn_writer};
    use otalink_core::MemoryDeviceStore;

    fn setup() -> (Dispatcher, Arc<DeviceRegistry>, Arc<MemoryDeviceStore>) {
        let registry = Arc::new(DeviceRegistry::new());
        let store = Arc::new(MemoryDeviceStore::new());
        let dispatcher = Dispatcher::new(registry.clone(), store.clone());
        (dispatcher, registry, store)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_acknowledges() {
        let (dispatcher, registry, store) = setup();
        let (link, receiver) = DeviceLink::channel(4);
        let (mut frames, _writer) = spawn_writer(receiver, None);
        let mut ctx = ConnectionContext::new(addr(), link.clone());

        dispatcher
            .handle_text(&mut ctx, r#"{"type":"REGISTER","deviceId":"D1"}"#)
            .await;

        assert_eq!(ctx.identity.as_deref(), Some("D1"));
        assert!(ctx.registered_at.is_some());
        assert_eq!(registry.lookup("D1").unwrap().id(), link.id());
        assert_eq!(store.get("D1").unwrap().unwrap().registrations, 1);
        assert_eq!(
            drain(&mut frames),
            vec![Frame::Control(ServerMessage::Registered {
                device_id: "D1".to_string()
            })]
        );
    }

    #[tokio::test]
    async fn test_malformed_is_ignored() {
        let (dispatcher, registry, _store) = setup();
        let (link, _receiver) = DeviceLink::channel(4);
        let mut ctx = ConnectionContext::new(addr(), link.clone());

        dispatcher.handle_text(&mut ctx, "not json").await;
        dispatcher.handle_text(&mut ctx, r#"{"type":"HELLO"}"#).await;
        dispatcher
            .handle_text(&mut ctx, r#"{"type":"REGISTER","deviceId":""}"#)
            .await;

        assert!(ctx.identity.is_none());
        assert!(registry.is_empty());
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn test_pong_touches_registered_device() {
        let (dispatcher, registry, store) = setup();
        let (link, receiver) = DeviceLink::channel(4);
        let (_frames, _writer) = spawn_writer(receiver, None);
        let mut ctx = ConnectionContext::new(addr(), link);

        dispatcher.dispatch(&mut ctx, DeviceMessage::Pong).await;
        assert!(store.get("D1").unwrap().is_none());

        dispatcher
            .dispatch(
                &mut ctx,
                DeviceMessage::Register {
                    device_id: "D1".to_string(),
                },
            )
            .await;
        let registered = registry.entry("D1").unwrap().last_seen;

        dispatcher.dispatch(&mut ctx, DeviceMessage::Pong).await;
        assert!(registry.entry("D1").unwrap().last_seen >= registered);
        assert!(store.get("D1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reregistration_closes_superseded_connection() {
        let (dispatcher, registry, _store) = setup();

        let (first, rx1) = DeviceLink::channel(4);
        let (_f1, _w1) = spawn_writer(rx1, None);
        let mut ctx1 = ConnectionContext::new(addr(), first.clone());

        let (second, rx2) = DeviceLink::channel(4);
        let (_f2, _w2) = spawn_writer(rx2, None);
        let mut ctx2 = ConnectionContext::new(addr(), second.clone());

        let register = r#"{"type":"REGISTER","deviceId":"D1"}"#;
        dispatcher.handle_text(&mut ctx1, register).await;
        dispatcher.handle_text(&mut ctx2, register).await;

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(registry.lookup("D1").unwrap().id(), second.id());

        // The superseded connection closing must not evict the new entry.
        dispatcher.on_close(&ctx1);
        assert_eq!(registry.lookup("D1").unwrap().id(), second.id());

        dispatcher.on_close(&ctx2);
        assert!(registry.lookup("D1").is_none());
    }

    #[tokio::test]
    async fn test_identity_change_on_same_connection() {
        let (dispatcher, registry, _store) = setup();
        let (link, receiver) = DeviceLink::channel(4);
        let (_frames, _writer) = spawn_writer(receiver, None);
        let mut ctx = ConnectionContext::new(addr(), link.clone());

        dispatcher
            .handle_text(&mut ctx, r#"{"type":"REGISTER","deviceId":"old"}"#)
            .await;
        dispatcher
            .handle_text(&mut ctx, r#"{"type":"REGISTER","deviceId":"new"}"#)
            .await;

        assert!(registry.lookup("old").is_none());
        assert_eq!(registry.lookup("new").unwrap().id(), link.id());
        assert!(link.is_open());
    }

    #[test]
    fn test_close_without_identity() {
        let (dispatcher, registry, _store) = setup();
        let (link, _receiver) = DeviceLink::channel(4);
        let ctx = ConnectionContext::new(addr(), link);

        dispatcher.on_close(&ctx);
        assert!(registry.is_empty());
    }
}
