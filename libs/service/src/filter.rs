use bytestring::ByteString;
use serde::{Deserialize, Serialize};

#[inline]
pub fn valid_topic(topic: &str) -> bool {
    if topic.is_empty() {
        return false;
    }
    !topic.contains(&['+', '#'][..])
}

#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
enum Segment {
    Name(ByteString),
    NumberSign,
    PlusSign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicFilter {
    path: ByteString,
    has_wildcards: bool,
    segments: Vec<Segment>,
}

impl TopicFilter {
    pub fn try_new(filter: impl Into<ByteString>) -> Option<TopicFilter> {
        let filter = filter.into();
        if filter.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        let mut number_sign = false;
        let mut has_wildcards = false;

        for s in filter.split('/') {
            // A '#' is only valid as the last segment.
            if number_sign {
                return None;
            }

            match s {
                "#" => {
                    segments.push(Segment::NumberSign);
                    number_sign = true;
                    has_wildcards = true;
                }
                "+" => {
                    segments.push(Segment::PlusSign);
                    has_wildcards = true;
                }
                _ if s.contains(&['+', '#'][..]) => return None,
                _ => segments.push(Segment::Name(s.to_string().into())),
            }
        }

        Some(TopicFilter {
            path: filter,
            has_wildcards,
            segments,
        })
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn has_wildcards(&self) -> bool {
        self.has_wildcards
    }

    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }

        let mut topics = topic.split('/');

        for segment in &self.segments {
            match (topics.next(), segment) {
                (None, Segment::NumberSign) => return true,
                (Some(t), Segment::NumberSign) if !t.starts_with('$') => return true,
                (Some(t), Segment::PlusSign) if !t.starts_with('$') => continue,
                (Some(t), Segment::Name(s)) if t == s.as_ref() as &str => continue,
                _ => return false,
            }
        }

        if topics.next().is_some() {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic() {
        assert!(!valid_topic(""));
        assert!(valid_topic("sport/tennis/player1"));
        assert!(!valid_topic("sport/tennis+/player1"));
        assert!(!valid_topic("sport/tennis/+/player1"));
        assert!(!valid_topic("sport/tennis#/player1"));
        assert!(!valid_topic("sport/tennis/#/player1"));
    }

    #[test]
    fn test_new() {
        let filter = TopicFilter::try_new("sport/tennis/player1/#").unwrap();
        assert!(filter.has_wildcards());

        let filter = TopicFilter::try_new("sport/tennis/+").unwrap();
        assert!(filter.has_wildcards());

        let filter = TopicFilter::try_new("sport/tennis/+/#").unwrap();
        assert!(filter.has_wildcards());

        assert!(TopicFilter::try_new("sport/#/player1").is_none());
        assert!(TopicFilter::try_new("sport/tennis#").is_none());
        assert!(TopicFilter::try_new("").is_none());

        let filter = TopicFilter::try_new("$SYS/#").unwrap();
        assert!(filter.has_wildcards());

        let filter = TopicFilter::try_new("$SYS/tennis/player1").unwrap();
        assert!(!filter.has_wildcards());
    }

    #[test]
    fn test_matches() {
        let filter = TopicFilter::try_new("sport/tennis/player1/#").unwrap();
        assert!(filter.matches("sport/tennis/player1"));
        assert!(filter.matches("sport/tennis/player1/ranking"));
        assert!(filter.matches("sport/tennis/player1/score/wimbledon"));

        let filter = TopicFilter::try_new("sport/tennis/+").unwrap();
        assert!(filter.matches("sport/tennis/player1"));
        assert!(filter.matches("sport/tennis/player2"));
        assert!(!filter.matches("sport/tennis/player1/ranking"));

        let filter = TopicFilter::try_new("sport/+").unwrap();
        assert!(!filter.matches("sport"));
        assert!(filter.matches("sport/"));

        let filter = TopicFilter::try_new("+/monitor/Clients").unwrap();
        assert!(!filter.matches("$SYS/monitor/Clients"));

        let filter = TopicFilter::try_new("$SYS/#").unwrap();
        assert!(filter.matches("$SYS/monitor/Clients"));

        let filter = TopicFilter::try_new("$SYS/monitor/+").unwrap();
        assert!(filter.matches("$SYS/monitor/Clients"));

        let filter = TopicFilter::try_new("#").unwrap();
        assert!(filter.matches("a/b/c"));
        assert!(!filter.matches("$SYS/monitor/Clients"));
    }
}
