use super::LineParser;
use crate::Message;
use serde_json::{Map, Value};

pub const NAME: &str = "httpd";

const TOKEN_COUNT: usize = 10;

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Apache common log format, e.g.
/// `127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326`.
///
/// The message time is a relative counter built from day-of-month and time of
/// day only. It is not an epoch: deltas are correct within one month, and
/// records spanning a month or year boundary compute wrong deltas. Existing
/// consumers depend on these exact values, so the formula stays as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpdParser;

impl HttpdParser {
    fn tokens(text: &str) -> Vec<&str> {
        text.split(' ').collect()
    }

    /// `dd/Mon/yyyy:HH:MM:SS` to milliseconds since the first of the month.
    ///
    /// A field that is missing, not numeric or too large to scale counts as
    /// zero; the sum saturates.
    pub fn relative_millis(timestamp: &str) -> i64 {
        let mut fields = timestamp.split(':').map(leading_int);
        let mut next = || fields.next().flatten();

        let day = next().and_then(|day| day.checked_sub(1));
        let hour = next();
        let minute = next();
        let second = next();

        [
            scaled(day, MS_PER_DAY),
            scaled(hour, MS_PER_HOUR),
            scaled(minute, MS_PER_MINUTE),
            scaled(second, MS_PER_SECOND),
        ]
        .into_iter()
        .fold(0, i64::saturating_add)
    }
}

impl LineParser for HttpdParser {
    fn name(&self) -> &str {
        NAME
    }

    fn is_valid(&self, text: &str) -> bool {
        Self::tokens(text).len() == TOKEN_COUNT
    }

    fn create_message(&self, text: &str) -> Message {
        let tokens = Self::tokens(text);
        let token = |i: usize| tokens.get(i).copied().unwrap_or_default();

        let timestamp = token(3).strip_prefix('[').unwrap_or(token(3));

        let mut body = Map::new();
        body.insert("host".to_string(), Value::from(token(0)));
        body.insert("timestamp".to_string(), Value::from(timestamp));
        body.insert("request".to_string(), Value::from(token(6)));
        body.insert("responseCode".to_string(), int_or_null(token(8)));
        body.insert("bytes".to_string(), int_or_null(token(9)));

        Message::new(Value::Object(body), Self::relative_millis(timestamp))
    }
}

/// Integer prefix of a token (`"10/Oct"` is 10), `None` when there is none.
fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

fn scaled(field: Option<i64>, unit: i64) -> i64 {
    field.and_then(|n| n.checked_mul(unit)).unwrap_or(0)
}

fn int_or_null(token: &str) -> Value {
    leading_int(token).map(Value::from).unwrap_or(Value::Null)
}
