pub mod connection;
pub mod settings;
pub mod store;

pub use connection::{Connection, ConnectionsDocument, SaveType, TokenMethod};
pub use settings::Settings;
pub use store::ConfigStore;
