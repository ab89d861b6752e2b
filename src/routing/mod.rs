//! Routing: which reader feeds which writers
//!
//! The [`ConnectionManager`] owns the registry of live sessions and the
//! route table binding each writer to a reader. Messages arriving from a
//! reader fan out to every writer currently routed to it; switching
//! policies ([`SwitchStrategy`]) rearrange the routes at runtime.

mod manager;
mod switching;

pub use manager::ConnectionManager;
pub use switching::{SwitchStrategy, Switcher};
