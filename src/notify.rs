use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-vendor broadcast of applied events. Booking sessions subscribe to
/// learn about appointments created by other clients.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a vendor's events. Creates the channel if needed.
    pub fn subscribe(&self, vendor_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(vendor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, vendor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&vendor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels with no remaining subscribers.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_vendor_events() {
        let hub = NotifyHub::new();
        let vendor = Ulid::new();
        let mut rx = hub.subscribe(vendor);

        let event = Event::AppointmentCancelled {
            vendor_id: vendor,
            id: Ulid::new(),
        };
        hub.send(vendor, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_vendors_are_not_delivered() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let mut rx = hub.subscribe(mine);
        let other = Ulid::new();
        hub.send(other, &Event::VendorCreated { id: other, name: None });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Ulid::new());
        drop(hub.subscribe(Ulid::new()));
        assert_eq!(hub.channel_count(), 2);
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
        drop(kept);
    }
}
