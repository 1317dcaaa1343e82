pub mod notification;
pub mod record;
pub mod sqlite;
pub mod store;
pub mod subscribe_data;

pub use notification::Notification;
pub use record::{subscription_key, DeliveryMode, SubscriptionRecord, SUBSCRIPTION_PREFIX};
pub use sqlite::SqliteStore;
pub use store::{ListPage, MemoryStore, StoreError, SubscriptionStore};
pub use subscribe_data::{Keys, SubscribeData};
