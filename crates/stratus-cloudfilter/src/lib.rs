//! stratus-cloudfilter: Windows Cloud Files API (CFAPI) bridge
//!
//! Lets a synchronization engine present remote files as placeholders:
//! - Sync root registration (the root shows in Explorer with cloud status icons)
//! - Placeholder creation, update and dehydration
//! - On-demand hydration: FETCH_DATA callbacks are queued to the engine and
//!   answered with `CfExecute(TRANSFER_DATA)`
//!
//! ## Architecture
//!
//! ```text
//! Application read of a dehydrated file
//!       │
//!       ├── CloudFiles minifilter driver (cflt.sys)
//!       │         │
//!       │         ├── CF_CALLBACK_TYPE_FETCH_DATA        → HydrationDispatcher
//!       │         └── CF_CALLBACK_TYPE_CANCEL_FETCH_DATA → HydrationDispatcher
//!       │
//!       └── stratus-cloudfilter (this crate)
//!                 │
//!                 ├── SyncRootRegistrar  → CfRegisterSyncRoot / CfUnregisterSyncRoot
//!                 ├── ConnectionManager  → CfConnectSyncRoot / CfDisconnectSyncRoot
//!                 ├── PlaceholderManager → CfCreatePlaceholders / CfUpdatePlaceholder / CfDehydratePlaceholder
//!                 ├── HydrationFeed      → bounded queue drained by HydrationWorkers
//!                 └── TransferResponder  → CfExecute(TRANSFER_DATA)
//! ```
//!
//! ## Platform
//!
//! The OS facility sits behind [`CloudFilterApi`]. `WindowsCloudFilter`
//! needs Windows 10 1809+ (build 17763); [`SimulatedCloudFilter`] runs
//! everywhere and backs the tests.

pub mod api;
pub mod codec;
pub mod connection;
pub mod error;
pub mod hydration;
pub mod placeholder;
pub mod provider;
pub mod registrar;
pub mod sim;
pub mod status;
pub mod transfer;
pub mod types;
pub mod worker;

#[cfg(target_os = "windows")]
pub mod win32;

pub use api::{CallbackHandler, CloudFilterApi, PlatformResult};
pub use codec::{FileIdentity, PROVIDER_ID};
pub use connection::{ConnectionManager, LiveConnections, SyncRootConnection};
pub use error::{CloudFilterError, ConnectionError, PlaceholderError, RegistrationError, TransferError};
pub use hydration::{HydrationDispatcher, HydrationFeed, HydrationRequest, HydrationStats, HydrationStatsSnapshot};
pub use placeholder::PlaceholderManager;
pub use provider::SyncRootProvider;
pub use registrar::SyncRootRegistrar;
pub use sim::SimulatedCloudFilter;
pub use status::PlatformStatus;
pub use transfer::{TransferCompletion, TransferResponder};
pub use types::{ConnectionKey, TransferKey};
pub use worker::{ContentSource, HydrationWorkers, WorkerConfig};

#[cfg(target_os = "windows")]
pub use win32::WindowsCloudFilter;
