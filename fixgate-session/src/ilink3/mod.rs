pub mod session;
pub mod state;

pub use session::Ilink3Session;
pub use state::{Ilink3SessionState, Ilink3State};
