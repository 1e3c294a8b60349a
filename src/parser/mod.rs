pub mod default;
pub mod httpd;

pub use default::DefaultParser;
pub use httpd::HttpdParser;

use crate::Message;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns raw log lines into messages.
pub trait LineParser {
    fn name(&self) -> &str;

    /// Whether a message should be created for this line at all.
    fn is_valid(&self, text: &str) -> bool;

    fn create_message(&self, text: &str) -> Message;
}

/// Parser selected by name before a timeline is built.
#[derive(Clone)]
pub enum Parser {
    Default(DefaultParser),
    Httpd(HttpdParser),
    Custom(Arc<dyn LineParser + Send + Sync>),
}

impl Parser {
    pub fn custom<P>(parser: P) -> Self
    where
        P: LineParser + Send + Sync + 'static,
    {
        Parser::Custom(Arc::new(parser))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::Default(DefaultParser)
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Parser").field(&self.name()).finish()
    }
}

impl LineParser for Parser {
    fn name(&self) -> &str {
        match self {
            Parser::Default(p) => p.name(),
            Parser::Httpd(p) => p.name(),
            Parser::Custom(p) => p.name(),
        }
    }

    fn is_valid(&self, text: &str) -> bool {
        match self {
            Parser::Default(p) => p.is_valid(text),
            Parser::Httpd(p) => p.is_valid(text),
            Parser::Custom(p) => p.is_valid(text),
        }
    }

    fn create_message(&self, text: &str) -> Message {
        match self {
            Parser::Default(p) => p.create_message(text),
            Parser::Httpd(p) => p.create_message(text),
            Parser::Custom(p) => p.create_message(text),
        }
    }
}

pub type ParserConstructor = fn() -> Parser;

/// Maps parser names to constructors. Unknown names resolve to the default parser.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    constructors: BTreeMap<String, ParserConstructor>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(default::NAME, || Parser::Default(DefaultParser));
        registry.register(httpd::NAME, || Parser::Httpd(HttpdParser));
        registry
    }

    /// Registers (or replaces) a constructor. Names are case-insensitive.
    pub fn register(&mut self, name: &str, constructor: ParserConstructor) {
        self.constructors
            .insert(name.to_ascii_lowercase(), constructor);
    }

    pub fn create(&self, name: &str) -> Parser {
        match self.constructors.get(&name.to_ascii_lowercase()) {
            Some(constructor) => {
                debug!("Using parser '{}'", name);
                constructor()
            }
            None => {
                warn!("Unknown parser '{}', falling back to default", name);
                Parser::default()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
