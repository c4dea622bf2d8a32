pub mod backup_service;
pub mod binding_service;
pub mod key_service;
pub mod proxy_service;
pub mod reconciler;
pub mod spend_monitor;
