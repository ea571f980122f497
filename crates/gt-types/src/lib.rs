pub mod actions;
pub mod cnec;
pub mod combination;
pub mod errors;
pub mod network;
pub mod parameters;
pub mod results;

pub use actions::*;
pub use cnec::*;
pub use combination::*;
pub use errors::*;
pub use network::*;
pub use parameters::*;
pub use results::*;
