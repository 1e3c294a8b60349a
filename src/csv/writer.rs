use crate::timeline::Timeline;
use crate::ReplayResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

const DELIMITER: char = ',';
const NAN_CELL: &str = "NaN";
const UNDEFINED_CELL: &str = "undefined";

/// Column name used when the first body is not an object.
pub const VALUE_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvEscaping {
    /// Values are written verbatim. Callers must keep them free of
    /// delimiters and newlines. A null (an unparsed number) is written as
    /// `NaN` and a field missing from a row as `undefined`, matching the
    /// files existing pipelines already consume.
    #[default]
    None,
    /// Fields containing a delimiter, quote or line break are quoted and
    /// embedded quotes doubled. Nulls are written as `null` and missing
    /// fields as empty cells.
    Rfc4180,
}

enum Columns {
    Fields(Vec<String>),
    WholeValue,
}

impl Columns {
    /// Taken from the first message only; later bodies are flattened against it.
    fn from_timeline(timeline: &Timeline) -> Option<Self> {
        let first = timeline.first()?;
        Some(match first.body() {
            Value::Object(map) => Columns::Fields(map.keys().cloned().collect()),
            _ => Columns::WholeValue,
        })
    }

    fn header(&self) -> Vec<&str> {
        match self {
            Columns::Fields(names) => names.iter().map(String::as_str).collect(),
            Columns::WholeValue => vec![VALUE_COLUMN],
        }
    }
}

/// Materialises a timeline as CSV: a header row, then one row per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWriter {
    escaping: CsvEscaping,
}

impl CsvWriter {
    pub fn new(escaping: CsvEscaping) -> Self {
        Self { escaping }
    }

    pub async fn write(&self, path: impl AsRef<Path>, timeline: &Timeline) -> ReplayResult<usize> {
        let path = path.as_ref();
        info!("Writing {} messages to {:?}", timeline.len(), path);

        let mut writer = BufWriter::new(File::create(path).await?);
        let rows = self.write_to(&mut writer, timeline).await?;
        writer.flush().await?;

        Ok(rows)
    }

    /// Returns the number of data rows written.
    pub async fn write_to<W>(&self, writer: &mut W, timeline: &Timeline) -> ReplayResult<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(columns) = Columns::from_timeline(timeline) else {
            warn!("Timeline is empty, nothing to write");
            return Ok(0);
        };

        let header = columns
            .header()
            .into_iter()
            .map(|name| self.escape(name.to_string()))
            .collect::<Vec<_>>();
        writer.write_all(join_line(&header).as_bytes()).await?;

        for message in timeline {
            let cells = match &columns {
                Columns::Fields(names) => names
                    .iter()
                    .map(|name| self.cell(message.body().get(name)))
                    .collect::<Vec<_>>(),
                Columns::WholeValue => vec![self.cell(Some(message.body()))],
            };
            writer.write_all(join_line(&cells).as_bytes()).await?;
        }

        Ok(timeline.len())
    }

    fn cell(&self, value: Option<&Value>) -> String {
        let text = match (value, self.escaping) {
            (None, CsvEscaping::None) => UNDEFINED_CELL.to_string(),
            (None, CsvEscaping::Rfc4180) => String::new(),
            (Some(Value::Null), CsvEscaping::None) => NAN_CELL.to_string(),
            (Some(Value::String(s)), _) => s.clone(),
            (Some(other), _) => other.to_string(),
        };
        self.escape(text)
    }

    fn escape(&self, text: String) -> String {
        match self.escaping {
            CsvEscaping::None => text,
            CsvEscaping::Rfc4180 => {
                if text.contains([DELIMITER, '"', '\n', '\r']) {
                    format!("\"{}\"", text.replace('"', "\"\""))
                } else {
                    text
                }
            }
        }
    }
}

fn join_line(cells: &[String]) -> String {
    let mut line = cells.join(&DELIMITER.to_string());
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use serde_json::json;

    async fn render(writer: CsvWriter, timeline: &Timeline) -> String {
        let mut out = Vec::new();
        writer.write_to(&mut out, timeline).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_header_from_first_body() {
        let timeline = Timeline::from(vec![
            Message::new(json!({"host": "a", "bytes": 10}), 0),
            Message::new(json!({"bytes": 20, "host": "b", "extra": true}), 1),
            Message::new(json!({"host": "c"}), 2),
        ]);

        assert_eq!(
            render(CsvWriter::default(), &timeline).await,
            "host,bytes\na,10\nb,20\nc,undefined\n"
        );
        assert_eq!(
            render(CsvWriter::new(CsvEscaping::Rfc4180), &timeline).await,
            "host,bytes\na,10\nb,20\nc,\n"
        );
    }

    #[tokio::test]
    async fn test_null_cells() {
        let timeline = Timeline::from(vec![Message::new(
            json!({"responseCode": 304, "bytes": null}),
            0,
        )]);

        assert_eq!(
            render(CsvWriter::default(), &timeline).await,
            "responseCode,bytes\n304,NaN\n"
        );
        assert_eq!(
            render(CsvWriter::new(CsvEscaping::Rfc4180), &timeline).await,
            "responseCode,bytes\n304,null\n"
        );
    }

    #[tokio::test]
    async fn test_scalar_bodies() {
        let timeline = Timeline::from(vec![
            Message::new(json!("first line"), 0),
            Message::new(json!(null), 0),
        ]);

        assert_eq!(
            render(CsvWriter::default(), &timeline).await,
            "value\nfirst line\nNaN\n"
        );
    }

    #[tokio::test]
    async fn test_rfc4180_escaping() {
        let timeline = Timeline::from(vec![Message::new(
            json!({"request": "GET /a,b", "agent": "say \"hi\"", "code": 200}),
            0,
        )]);

        assert_eq!(
            render(CsvWriter::new(CsvEscaping::None), &timeline).await,
            "request,agent,code\nGET /a,b,say \"hi\",200\n"
        );
        assert_eq!(
            render(CsvWriter::new(CsvEscaping::Rfc4180), &timeline).await,
            "request,agent,code\n\"GET /a,b\",\"say \"\"hi\"\"\",200\n"
        );
    }

    #[tokio::test]
    async fn test_empty_timeline() {
        assert_eq!(render(CsvWriter::default(), &Timeline::new()).await, "");
    }
}
