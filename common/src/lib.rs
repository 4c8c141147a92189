pub mod storage;

pub use storage::config::{DatabaseConfig, DatabaseInfo, InstanceInfo};
pub use storage::{
    Command, Connector, FieldValues, Message, Notification, Reply, SCAN_START, Store,
    StoreError, StoreRead, StoreResult, Subscription,
};
