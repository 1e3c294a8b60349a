pub mod settings;

pub use settings::{
    BrokerSettings, Config, CsvSettings, LoggingSettings, Mode, ReplaySettings, parse_broker_list,
};
