//! # smsrelay
//!
//! Relays outbound text messages for a remote backend. The backend queues
//! "pending" message requests; this crate polls for them, sends each one
//! through a device send primitive with pacing and bounded retry, records
//! the outcome in a local ledger, and pushes the status back.
//!
//! The ledger makes dispatch idempotent across restarts and overlapping
//! polls: a request id recorded there is never sent again, and if the
//! backend still lists it as pending the recorded status is pushed again
//! instead.
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use smsrelay::{
//!     CommandSender, ConnectivityMonitor, DeliveryLedger, DispatchConfig, DispatchEngine,
//!     PollScheduler, RemoteQueueClient,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn wire(remote: Arc<dyn RemoteQueueClient>) -> smsrelay::Result<()> {
//! let ledger = Arc::new(DeliveryLedger::open("./data/ledger.json".as_ref())?);
//! let sender = Arc::new(CommandSender::new("termux-sms-send -n")?);
//! let connectivity = ConnectivityMonitor::new(true);
//!
//! let engine = Arc::new(DispatchEngine::new(
//!     remote,
//!     sender,
//!     ledger,
//!     connectivity,
//!     DispatchConfig::default(),
//! ));
//! let scheduler = PollScheduler::new(engine, Duration::from_secs(15));
//! tokio::spawn(Arc::clone(&scheduler).run());
//! # Ok(())
//! # }
//! ```
//!
//! The HTTP implementation of [`RemoteQueueClient`] lives in the companion
//! `smsrelay-remote` crate; the `smsrelay-agent` crate wires everything into
//! a daemon.

pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod ledger;
pub mod remote;
pub mod scheduler;
pub mod sender;
pub mod types;

pub use config::{DispatchConfig, RelayConfig};
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe};
pub use dispatch::DispatchEngine;
pub use error::{RelayError, Result};
pub use history::{group_by_phone_number, Conversation};
pub use ledger::DeliveryLedger;
pub use remote::RemoteQueueClient;
pub use scheduler::{PollScheduler, SchedulerState};
pub use sender::{callback_bridge, CommandSender, NativeSender, SendCallbacks};
pub use types::*;
