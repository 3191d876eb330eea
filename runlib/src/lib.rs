mod actors;
pub mod env;
pub mod errors;
pub mod events;
pub mod logs;
pub mod stop;
pub mod strategy;
pub mod types;

// re-export the supervisor handle as if it is the supervisor itself.
pub use actors::supervisor::SupervisorHandle as Supervisor;
pub use env::EnvView;
pub use events::{Admission, SlotStatus, StopOutcome};
pub use types::Job;
