pub mod outcome;
pub mod port;
pub mod state;
pub mod vessel;

pub use outcome::*;
pub use port::*;
pub use state::*;
pub use vessel::*;
