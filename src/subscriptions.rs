// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::{ConnectionId, SubscriptionId};
use bytes::Bytes;
use log::debug;
use oh_shared::messages::{self, Event};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use yggdrasil::{make_error, Glob, Path, TreeChanges};

make_error!(SubscriptionError; {
    NoSuchSubscription => String,
    NodeContainsSubscriptions => String
});
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// The collection of observed globs and who to notify when a path matching
/// one of them changes. The index is not attached to tree nodes: a glob may
/// span subtrees that do not exist yet.
pub struct Subscriptions {
    subs: HashMap<SubscriptionId, Subscription>,
}

struct Subscription {
    conn: ConnectionId,
    glob: Glob,
    sink: UnboundedSender<Bytes>,
}

impl Subscriptions {
    pub fn new() -> Subscriptions {
        Subscriptions {
            subs: HashMap::new(),
        }
    }

    pub fn add_subscription(
        &mut self,
        sid: SubscriptionId,
        conn: ConnectionId,
        glob: Glob,
        sink: UnboundedSender<Bytes>,
    ) {
        let existing = self.subs.insert(sid, Subscription { conn, glob, sink });
        assert!(existing.is_none());
    }

    pub fn remove_subscription(&mut self, sid: SubscriptionId) -> SubscriptionResult<()> {
        match self.subs.remove(&sid) {
            Some(_) => Ok(()),
            None => Err(SubscriptionError::NoSuchSubscription(sid.to_string())),
        }
    }

    /// Remove all subscriptions owned by the given connection.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        self.subs.retain(|_, sub| sub.conn != conn);
    }

    /// A node is pinned while a subscription names exactly its path. Glob
    /// subscriptions never pin nodes.
    pub fn verify_no_subscriptions_at_path(&self, path: &Path) -> SubscriptionResult<()> {
        for (sid, sub) in &self.subs {
            if let Some(exact) = sub.glob.as_exact_path() {
                if exact == path {
                    return Err(SubscriptionError::NodeContainsSubscriptions(format!(
                        "{} (subscription {})",
                        path, sid
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fan one coalesced change set out to every subscription whose glob
    /// matches at least one affected path. Each subscription receives one
    /// event restricted to its matching paths. The writing connection does
    /// not care about delivery failures here; a send error just means that
    /// session is already gone.
    pub fn distribute_changes(&self, changes: &TreeChanges) {
        let mut sids = self.subs.keys().copied().collect::<Vec<SubscriptionId>>();
        sids.sort();
        let mut values = changes.keys().collect::<Vec<&String>>();
        values.sort();

        for sid in sids {
            let sub = &self.subs[&sid];
            let mut filtered = Vec::new();
            for value in &values {
                let matching = changes[*value]
                    .iter()
                    .filter(|path| sub.glob.matches(path))
                    .map(|path| path.to_str())
                    .collect::<Vec<String>>();
                if !matching.is_empty() {
                    filtered.push(((*value).clone(), matching));
                }
            }
            if filtered.is_empty() {
                continue;
            }
            let event = Event {
                subscription_id: sid.to_u64(),
                changes: filtered,
            };
            if sub.sink.send(messages::encode_event(&event)).is_err() {
                debug!("dropping event for vanished subscription {}", sid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oh_shared::messages::ServerMessage;
    use std::collections::HashMap;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use yggdrasil::PathBuilder;

    fn make_path(p: &str) -> Path {
        PathBuilder::new(p).unwrap().finish_path().unwrap()
    }

    fn make_glob(g: &str) -> Glob {
        PathBuilder::new(g).unwrap().finish_glob().unwrap()
    }

    fn changes(pairs: &[(&str, &[&str])]) -> TreeChanges {
        let mut out = TreeChanges::new();
        for (value, paths) in pairs {
            out.insert(
                (*value).to_owned(),
                paths.iter().map(|p| make_path(p)).collect(),
            );
        }
        out
    }

    fn next_event(rx: &mut UnboundedReceiver<Bytes>) -> HashMap<String, Vec<String>> {
        let frame = rx.try_recv().expect("expected a queued event");
        match messages::parse_server_message(&frame).unwrap() {
            ServerMessage::Event(event) => event.changes.into_iter().collect(),
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_filters_by_glob() {
        let mut subs = Subscriptions::new();
        let (tx, mut rx) = unbounded_channel();
        subs.add_subscription(
            SubscriptionId::from_u64(1),
            ConnectionId::from_u64(1),
            make_glob("/a/*"),
            tx,
        );

        subs.distribute_changes(&changes(&[("foo", &["/a/x", "/b/y"])]));
        let event = next_event(&mut rx);
        assert_eq!(event["foo"], vec!["/a/x"]);

        // Nothing matching, nothing delivered.
        subs.distribute_changes(&changes(&[("foo", &["/b/y"])]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_carries_all_values() {
        let mut subs = Subscriptions::new();
        let (tx, mut rx) = unbounded_channel();
        subs.add_subscription(
            SubscriptionId::from_u64(1),
            ConnectionId::from_u64(1),
            make_glob("/*"),
            tx,
        );

        subs.distribute_changes(&changes(&[
            ("bar", &["/arg1"]),
            ("foobar", &["/result"]),
        ]));
        let event = next_event(&mut rx);
        assert_eq!(event["bar"], vec!["/arg1"]);
        assert_eq!(event["foobar"], vec!["/result"]);
    }

    #[test]
    fn test_unsubscribe_is_isolated() {
        let mut subs = Subscriptions::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        subs.add_subscription(
            SubscriptionId::from_u64(1),
            ConnectionId::from_u64(1),
            make_glob("/a"),
            tx1,
        );
        subs.add_subscription(
            SubscriptionId::from_u64(2),
            ConnectionId::from_u64(1),
            make_glob("/a"),
            tx2,
        );

        subs.remove_subscription(SubscriptionId::from_u64(1)).unwrap();
        subs.distribute_changes(&changes(&[("foo", &["/a"])]));
        assert!(rx1.try_recv().is_err());
        assert_eq!(next_event(&mut rx2)["foo"], vec!["/a"]);

        assert_eq!(
            subs.remove_subscription(SubscriptionId::from_u64(1))
                .unwrap_err()
                .name(),
            "NoSuchSubscription"
        );
    }

    #[test]
    fn test_remove_connection_drops_all_subscriptions() {
        let mut subs = Subscriptions::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        subs.add_subscription(
            SubscriptionId::from_u64(1),
            ConnectionId::from_u64(1),
            make_glob("/a"),
            tx1,
        );
        subs.add_subscription(
            SubscriptionId::from_u64(2),
            ConnectionId::from_u64(2),
            make_glob("/a"),
            tx2,
        );

        subs.remove_connection(ConnectionId::from_u64(1));
        subs.distribute_changes(&changes(&[("foo", &["/a"])]));
        assert!(rx1.try_recv().is_err());
        assert_eq!(next_event(&mut rx2)["foo"], vec!["/a"]);
    }

    #[test]
    fn test_exact_subscriptions_pin_nodes() {
        let mut subs = Subscriptions::new();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();
        subs.add_subscription(
            SubscriptionId::from_u64(1),
            ConnectionId::from_u64(1),
            make_glob("/a"),
            tx1,
        );
        subs.add_subscription(
            SubscriptionId::from_u64(2),
            ConnectionId::from_u64(1),
            make_glob("/{a,b}"),
            tx2,
        );

        assert_eq!(
            subs.verify_no_subscriptions_at_path(&make_path("/a"))
                .unwrap_err()
                .name(),
            "NodeContainsSubscriptions"
        );
        // The glob subscription alone does not pin /b.
        subs.verify_no_subscriptions_at_path(&make_path("/b")).unwrap();

        subs.remove_subscription(SubscriptionId::from_u64(1)).unwrap();
        subs.verify_no_subscriptions_at_path(&make_path("/a")).unwrap();
    }
}
