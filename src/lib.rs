//! Integration-test harness for Arm Virtual Hardware instances.
//!
//! The crate exposes a control-plane client for the AVH cloud API and a
//! lifecycle controller that drives a single emulation instance through its
//! full arc (create → wait until on → wait until booted → run firmware →
//! delete). A [`harness::Harness`] orchestrates the whole flow with
//! guaranteed teardown, and a [`janitor::Janitor`] sweeps instances leaked
//! by earlier runs.

pub mod client;
pub mod config;
pub mod console;
pub mod control_plane;
pub mod harness;
pub mod instance;
pub mod janitor;
pub mod shell;

pub use client::{
    AvhClient, ClientError, InstanceSpec, InstanceSpecBuilder, InstanceState, InstanceSummary,
    SpecError, UploadKind,
};
pub use config::{
    ConfigError, ConsoleMode, DEFAULT_BOOT_MARKER, ExecStrategy, HarnessConfig,
    INSTANCE_NAME_PREFIX, WaitTimings,
};
pub use console::ConsoleChannel;
pub use control_plane::{ClientFuture, ControlPlane};
pub use harness::{Harness, HarnessError, RunOutcome, RunRequest};
pub use instance::{ControllerOptions, FvpInstance, InstanceError, Phase, RunResult};
pub use janitor::{Janitor, JanitorError, SweepSummary};
pub use shell::{
    CommandOutput, CommandRunner, ProcessCommandRunner, ProxiedShell, ShellConfig, ShellError,
};
