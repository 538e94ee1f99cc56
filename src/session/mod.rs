pub mod coordinator;
pub mod files;
pub mod notify;
pub mod store;

pub use coordinator::{Outcome, SessionArgs, SessionCoordinator, StatusReport};
pub use files::{FileInfo, FileUpload, build_file_message, file_info, mime_type_for};
pub use notify::{
    ErrorNotice, IDLE_TIMEOUT_DETAIL, Notification, NotificationSink, NullSink, StatusUpdate,
};
pub use store::{ConfigStore, DEFAULT_CONFIG_FILE};
