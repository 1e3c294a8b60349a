pub mod builder;

pub use builder::{BuildStats, TimelineBuilder};

use crate::Message;

/// Messages in the order their lines were read. Never re-sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Logical-time gap between message `index` and the one after it.
    pub fn delta_after(&self, index: usize) -> Option<i64> {
        let current = self.messages.get(index)?;
        let next = self.messages.get(index + 1)?;
        Some(next.logical_time_ms().saturating_sub(current.logical_time_ms()))
    }
}

impl From<Vec<Message>> for Timeline {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl IntoIterator for Timeline {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(times: &[i64]) -> Timeline {
        times.iter().map(|t| Message::new(json!(null), *t)).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_delta_after() {
        let timeline = at(&[100, 350, 50]);
        assert_eq!(timeline.delta_after(0), Some(250));
        assert_eq!(timeline.delta_after(1), Some(-300));
        assert_eq!(timeline.delta_after(2), None);
    }

    #[test]
    fn test_delta_after_saturates_on_extreme_times() {
        let timeline = at(&[i64::MIN, i64::MAX, i64::MIN]);
        assert_eq!(timeline.delta_after(0), Some(i64::MAX));
        assert_eq!(timeline.delta_after(1), Some(i64::MIN));
    }
}
