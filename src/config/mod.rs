pub mod catalog;
pub mod settings;

pub use catalog::FeedCatalog;
pub use settings::Settings;
