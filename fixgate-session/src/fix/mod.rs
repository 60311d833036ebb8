pub mod session;
pub mod state;

pub use session::FixSession;
pub use state::{FixSessionState, FixState};
