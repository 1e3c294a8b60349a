use super::LineParser;
use crate::Message;

pub const NAME: &str = "default";

/// Accepts every line and wraps it untouched. Messages are stamped with the
/// time they were parsed, so replay timing carries no history.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl LineParser for DefaultParser {
    fn name(&self) -> &str {
        NAME
    }

    fn is_valid(&self, _text: &str) -> bool {
        true
    }

    fn create_message(&self, text: &str) -> Message {
        Message::now(serde_json::Value::String(text.to_string()))
    }
}
