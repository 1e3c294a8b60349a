pub mod writer;

pub use writer::{CsvEscaping, CsvWriter};
