mod client;

pub use client::{
    render_invocation, ExecutionResult, RemoteCommand, RemoteExecutor, SshOptions,
};
