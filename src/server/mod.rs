mod builder;
mod handler;
mod loader;
mod server;
mod session;
pub mod state;

pub use builder::NgApimockServerBuilder;
pub use handler::{ScopedState, SessionScoped, SharedScoped};
pub use server::{Error, NgApimockServer};
pub use session::{resolve_session, Mode};
