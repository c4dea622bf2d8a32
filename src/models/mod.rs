pub mod backup_key;
pub mod binding;
pub mod key;
pub mod proxy;
pub mod spend_history;
