//! # timebox-core
//!
//! Run one child process under a wall-clock timeout and escalate through an
//! ordered signal sequence when it does not exit in time.
//!
//! The crate is split along the three concerns of a supervised run:
//!
//! - [`escalation`]: the pure policy deciding which signal comes next
//! - [`supervisor`]: spawning, waiting, signalling and reaping the child
//! - [`report`]: turning the outcome into a [`Report`] and an exit status
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use timebox_core::{Disposition, Invocation, supervise};
//!
//! # async fn example() -> Result<(), timebox_core::SuperviseError> {
//! let invocation = Invocation::builder("sleep")
//!     .arg("10")
//!     .timeout(Duration::from_secs(1))
//!     .grace(Duration::from_millis(500))
//!     .build()?;
//!
//! match supervise(&invocation).await? {
//!     Disposition::NormalExit { code } => println!("exited with {code}"),
//!     other => println!("{other}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Process groups
//!
//! Every child is started as the leader of a fresh process group, and every
//! escalation signal is delivered to that group. Grandchildren started by
//! the child are therefore signalled too, unless they move themselves into
//! another group.

#![warn(missing_docs)]

pub mod config;
pub mod disposition;
pub mod error;
pub mod escalation;
pub mod invocation;
pub mod report;
pub mod signal;
pub mod supervisor;

mod humantime_serde;

pub use config::{LogConfig, SupervisionConfig, TimeboxConfig};
pub use disposition::Disposition;
pub use error::{ConfigError, SuperviseError};
pub use escalation::{EscalationPolicy, EscalationState, EscalationStep};
pub use invocation::{Invocation, InvocationBuilder, StdioMode, UnkillablePolicy};
pub use nix::sys::signal::Signal;
pub use report::{EscalationTrigger, Report, to_exit_status};
pub use supervisor::{
    ChildHandle, SignalDelivery, Supervisor, run_with_timeout, supervise, supervise_with_cancel,
};
