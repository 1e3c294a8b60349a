pub mod producer;

pub use producer::{Credentials, DeliveryMode, DeliverySnapshot, Producer, ProducerConfig};
