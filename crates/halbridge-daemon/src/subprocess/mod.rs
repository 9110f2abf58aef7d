//! MegaHAL subprocess supervision.

pub mod supervisor;

pub use supervisor::{
    OutputEvent, ProcessHandle, ProcessSupervisor, SubprocessError, WriterCommand,
};
