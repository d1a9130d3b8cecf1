pub mod alarm;
pub mod assistant;
pub mod cache;
pub mod clock;
pub mod config;
pub mod content;
pub mod daemon;
pub mod events;
pub mod grace;
pub mod ipc;
pub mod scheduler;
pub mod stats;

pub use assistant::{AssistantError, Command, FocusAssistant, Response, SkipReason};
pub use cache::{CacheStats, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use content::{ContentExtractor, HttpContentExtractor, PageContent};
pub use daemon::Daemon;
pub use events::FocusEvent;
pub use grace::{GracePeriodController, TabId};
pub use ipc::{EventStream, IpcClient, IpcRequest, IpcResponse};
pub use scheduler::{SchedulerConfig, SchedulerError, SessionScheduler, SessionSnapshot};
