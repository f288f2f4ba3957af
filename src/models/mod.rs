pub mod health;
pub mod messages;
pub mod task;

pub use health::*;
pub use messages::*;
pub use task::*;
