use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Split;

use fnv::FnvHashMap;

use crate::message::Message;

#[derive(Debug)]
struct Node<D> {
    hash_child: Option<Box<Node<D>>>,
    plus_child: Option<Box<Node<D>>>,
    named_children: HashMap<String, Node<D>>,
    subscribers: FnvHashMap<u64, D>,
    retained_message: Option<Message>,
}

impl<D> Node<D> {
    #[inline]
    fn is_empty(&self) -> bool {
        self.hash_child.is_none()
            && self.plus_child.is_none()
            && self.named_children.is_empty()
            && self.subscribers.is_empty()
            && self.retained_message.is_none()
    }
}

impl<D> Default for Node<D> {
    fn default() -> Self {
        Self {
            hash_child: None,
            plus_child: None,
            named_children: HashMap::new(),
            subscribers: FnvHashMap::default(),
            retained_message: None,
        }
    }
}

/// Trie over topic-filter segments. Subscriber data lives at the filter's
/// leaf node, keyed by subscriber id; retained messages live at the topic's
/// leaf node.
pub struct FilterTree<D> {
    root: Node<D>,
    subscribers_count: usize,
    retained_messages_count: usize,
}

impl<D> Default for FilterTree<D> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            subscribers_count: 0,
            retained_messages_count: 0,
        }
    }
}

impl<D> FilterTree<D> {
    fn internal_insert(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node<D>,
        id: u64,
        data: D,
    ) -> Option<D> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();

        let node = match segment {
            "#" => parent_node
                .hash_child
                .get_or_insert_with(|| Box::new(Node::default())),
            "+" => parent_node
                .plus_child
                .get_or_insert_with(|| Box::new(Node::default())),
            _ => parent_node
                .named_children
                .entry(segment.to_string())
                .or_default(),
        };

        if is_end {
            node.subscribers.insert(id, data)
        } else {
            Self::internal_insert(segments, node, id, data)
        }
    }

    pub fn insert(&mut self, filter: impl AsRef<str>, id: u64, data: D) -> Option<D> {
        let mut segments = filter.as_ref().split('/').peekable();
        assert!(segments.peek().is_some());
        let res = Self::internal_insert(segments, &mut self.root, id, data);
        if res.is_none() {
            self.subscribers_count += 1;
        }
        res
    }

    fn internal_matches<'a>(
        parent_node: &'a Node<D>,
        nodes: &mut Vec<&'a Node<D>>,
        segments: &[&str],
        sys: bool,
    ) {
        let (segment, tail) = segments.split_first().unwrap();
        let is_end = tail.is_empty();

        // Wildcards never match the first level of a `$`-prefixed topic.
        if !sys {
            nodes.extend(parent_node.hash_child.as_deref());
        }

        if is_end {
            if !sys {
                if let Some(plus_node) = parent_node.plus_child.as_deref() {
                    nodes.push(plus_node);
                    // "a/+/#" matches "a/b" as well.
                    nodes.extend(plus_node.hash_child.as_deref());
                }
            }
            if let Some(named_node) = parent_node.named_children.get(*segment) {
                nodes.push(named_node);
                // "a/#" matches its parent level "a".
                nodes.extend(named_node.hash_child.as_deref());
            }
        } else {
            if !sys {
                if let Some(plus_node) = parent_node.plus_child.as_deref() {
                    Self::internal_matches(plus_node, nodes, tail, false);
                }
            }
            if let Some(named_node) = parent_node.named_children.get(*segment) {
                Self::internal_matches(named_node, nodes, tail, false);
            }
        }
    }

    pub fn matches(&self, topic: impl AsRef<str>) -> Vec<(&u64, &D)> {
        let mut nodes = Vec::new();
        let segments = topic.as_ref().split('/').collect::<Vec<_>>();
        assert!(!segments.is_empty());
        let sys = segments[0].starts_with('$');
        Self::internal_matches(&self.root, &mut nodes, &segments[..], sys);
        nodes
            .into_iter()
            .flat_map(|node| node.subscribers.iter())
            .collect()
    }

    fn internal_remove(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node<D>,
        id: u64,
    ) -> Option<D> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();

        let node = match segment {
            "#" => parent_node.hash_child.as_deref_mut(),
            "+" => parent_node.plus_child.as_deref_mut(),
            _ => parent_node.named_children.get_mut(segment),
        }?;

        let res = if is_end {
            node.subscribers.remove(&id)
        } else {
            Self::internal_remove(segments, node, id)
        };

        if node.is_empty() {
            match segment {
                "#" => parent_node.hash_child = None,
                "+" => parent_node.plus_child = None,
                _ => {
                    parent_node.named_children.remove(segment);
                }
            }
        }

        res
    }

    pub fn remove(&mut self, filter: impl AsRef<str>, id: u64) -> Option<D> {
        let mut segments = filter.as_ref().split('/').peekable();
        assert!(segments.peek().is_some());
        let res = Self::internal_remove(segments, &mut self.root, id);
        if res.is_some() {
            self.subscribers_count -= 1;
        }
        res
    }

    fn collect_retained_all<'a>(node: &'a Node<D>, msgs: &mut Vec<&'a Message>, skip_sys: bool) {
        msgs.extend(node.retained_message.as_ref());
        for (name, child) in &node.named_children {
            if skip_sys && name.starts_with('$') {
                continue;
            }
            Self::collect_retained_all(child, msgs, false);
        }
    }

    fn internal_matches_retained<'a>(
        parent_node: &'a Node<D>,
        msgs: &mut Vec<&'a Message>,
        segments: &[&str],
        root: bool,
    ) {
        let (segment, tail) = segments.split_first().unwrap();
        let is_end = tail.is_empty();

        match *segment {
            "#" => {
                Self::collect_retained_all(parent_node, msgs, root);
            }
            "+" => {
                for (name, child) in &parent_node.named_children {
                    if root && name.starts_with('$') {
                        continue;
                    }
                    if is_end {
                        msgs.extend(child.retained_message.as_ref());
                    } else {
                        Self::internal_matches_retained(child, msgs, tail, false);
                    }
                }
            }
            _ => {
                if let Some(child) = parent_node.named_children.get(*segment) {
                    if is_end {
                        msgs.extend(child.retained_message.as_ref());
                    } else {
                        Self::internal_matches_retained(child, msgs, tail, false);
                    }
                }
            }
        }
    }

    pub fn matches_retained_messages(&self, filter: impl AsRef<str>) -> Vec<&Message> {
        let mut msgs = Vec::new();
        let segments = filter.as_ref().split('/').collect::<Vec<_>>();
        assert!(!segments.is_empty());
        Self::internal_matches_retained(&self.root, &mut msgs, &segments[..], true);
        msgs
    }

    fn internal_set_retained_message(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node<D>,
        retained_message: Option<Message>,
    ) -> Option<Message> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();
        let is_delete = retained_message.is_none();

        let node = parent_node
            .named_children
            .entry(segment.to_string())
            .or_default();

        let res = if is_end {
            let res = node.retained_message.take();
            node.retained_message = retained_message;
            res
        } else {
            Self::internal_set_retained_message(segments, node, retained_message)
        };

        if is_delete && node.is_empty() {
            parent_node.named_children.remove(segment);
        }

        res
    }

    pub fn set_retained_message(
        &mut self,
        path: impl AsRef<str>,
        msg: Option<Message>,
    ) -> Option<Message> {
        let mut segments = path.as_ref().split('/').peekable();
        assert!(segments.peek().is_some());
        let set_new = msg.is_some();
        let res = Self::internal_set_retained_message(segments, &mut self.root, msg);
        match (&res, set_new) {
            (None, true) => self.retained_messages_count += 1,
            (Some(_), false) => self.retained_messages_count -= 1,
            _ => {}
        }
        res
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers_count
    }

    #[inline]
    pub fn retained_messages_count(&self) -> usize {
        self.retained_messages_count
    }
}

#[cfg(test)]
mod tests {
    use codec::Qos;

    use super::*;

    macro_rules! do_matches {
        ($tree:expr, $topic:expr) => {{
            let mut res = $tree.matches($topic);
            res.sort_by(|a, b| a.0.cmp(b.0));
            res
        }};
    }

    macro_rules! do_matches_retained_messages {
        ($tree:expr, $topic:expr) => {{
            let mut res = $tree
                .matches_retained_messages($topic)
                .into_iter()
                .map(|msg| &**msg.topic())
                .collect::<Vec<_>>();
            res.sort_unstable();
            res
        }};
    }

    #[test]
    fn test_matches() {
        let mut tree = FilterTree::default();

        tree.insert("a/b/c", 1, 1);
        tree.insert("a/+/c", 2, 1);
        tree.insert("d/+", 1, 2);
        tree.insert("#", 3, 1);
        tree.insert("a/#", 4, 1);

        assert_eq!(tree.subscriber_count(), 5);

        assert_eq!(
            do_matches!(tree, "a/b/c"),
            vec![(&1, &1), (&2, &1), (&3, &1), (&4, &1)]
        );
        assert_eq!(do_matches!(tree, "d/1"), vec![(&1, &2), (&3, &1)]);
        assert_eq!(do_matches!(tree, "d/1/1"), vec![(&3, &1)]);
        assert_eq!(do_matches!(tree, "a/1"), vec![(&3, &1), (&4, &1)]);

        // "a/#" covers its parent level.
        assert_eq!(do_matches!(tree, "a"), vec![(&3, &1), (&4, &1)]);
    }

    #[test]
    fn test_sys_topics() {
        let mut tree = FilterTree::default();

        tree.insert("#", 1, 1);
        tree.insert("+/monitor", 2, 1);
        tree.insert("$SYS/#", 3, 1);
        tree.insert("$SYS/monitor", 4, 1);

        assert_eq!(do_matches!(tree, "$SYS/monitor"), vec![(&3, &1), (&4, &1)]);
        assert_eq!(do_matches!(tree, "a/monitor"), vec![(&1, &1), (&2, &1)]);
    }

    #[test]
    fn test_remove() {
        let mut tree = FilterTree::default();

        tree.insert("a/b/c", 1, 1);
        tree.insert("a/b", 2, 1);
        assert_eq!(tree.subscriber_count(), 2);

        assert_eq!(tree.remove("a/b", 2), Some(1));
        assert_eq!(tree.subscriber_count(), 1);
        assert!(!tree.root.named_children.is_empty());

        assert_eq!(tree.remove("a/b/c", 1), Some(1));
        assert_eq!(tree.subscriber_count(), 0);

        assert!(tree.root.named_children.is_empty());

        tree.insert("a/+/c", 1, 1);
        tree.insert("a/b/c", 2, 1);
        assert_eq!(tree.subscriber_count(), 2);
        assert_eq!(tree.remove("a/+/c", 1), Some(1));
        assert_eq!(tree.remove("a/b/c", 2), Some(1));
        assert_eq!(tree.subscriber_count(), 0);
        assert!(tree.root.named_children.is_empty());

        tree.insert("a/#", 1, 1);
        tree.insert("a", 2, 1);
        assert_eq!(tree.subscriber_count(), 2);
        assert_eq!(tree.remove("a/#", 1), Some(1));
        assert_eq!(tree.remove("a", 2), Some(1));
        assert_eq!(tree.subscriber_count(), 0);
        assert!(tree.root.named_children.is_empty());

        assert_eq!(tree.remove("x/y", 9), None);
    }

    #[test]
    fn test_retained_messages() {
        let mut tree = FilterTree::<i32>::default();

        tree.set_retained_message("a/b/c", Some(Message::new("a", Qos::AtMostOnce, &b"123"[..])));
        tree.set_retained_message("a/k/c", Some(Message::new("d", Qos::AtMostOnce, &b"123"[..])));
        tree.set_retained_message("a/b", Some(Message::new("b", Qos::AtMostOnce, &b"123"[..])));
        tree.set_retained_message("b/1", Some(Message::new("c", Qos::AtMostOnce, &b"123"[..])));
        assert_eq!(tree.retained_messages_count(), 4);

        assert_eq!(
            do_matches_retained_messages!(tree, "a/#"),
            vec!["a", "b", "d"]
        );
        assert_eq!(do_matches_retained_messages!(tree, "a/b"), vec!["b"]);
        assert_eq!(do_matches_retained_messages!(tree, "b/+"), vec!["c"]);
        assert_eq!(
            do_matches_retained_messages!(tree, "#"),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(do_matches_retained_messages!(tree, "a/+/c"), vec!["a", "d"]);

        tree.set_retained_message("b/1", None);
        assert_eq!(tree.retained_messages_count(), 3);

        tree.set_retained_message("a/b", None);
        assert_eq!(tree.retained_messages_count(), 2);

        tree.set_retained_message("c", None);
        assert_eq!(tree.retained_messages_count(), 2);

        tree.set_retained_message("a/b/c", None);
        assert_eq!(tree.retained_messages_count(), 1);

        tree.set_retained_message("a/k/c", None);
        assert_eq!(tree.retained_messages_count(), 0);

        assert!(tree.root.is_empty());
    }

    #[test]
    fn test_retained_sys_topics() {
        let mut tree = FilterTree::<i32>::default();

        tree.set_retained_message(
            "$SYS/uptime",
            Some(Message::new("$SYS/uptime", Qos::AtMostOnce, &b"1"[..])),
        );
        tree.set_retained_message("a/b", Some(Message::new("a/b", Qos::AtMostOnce, &b"2"[..])));

        assert_eq!(do_matches_retained_messages!(tree, "#"), vec!["a/b"]);
        assert_eq!(do_matches_retained_messages!(tree, "+/uptime"), Vec::<&str>::new());
        assert_eq!(
            do_matches_retained_messages!(tree, "$SYS/#"),
            vec!["$SYS/uptime"]
        );
    }
}
