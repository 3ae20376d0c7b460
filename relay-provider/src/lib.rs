//! Completion provider boundary.
//!
//! The reply generator is a browser-driven chat UI with no API: a
//! single, exclusive, stateful resource that is slow and can fail. This
//! crate models it as an opaque async function (`CompletionProvider`)
//! and ships the one real implementation: a polling loop over a
//! `ChatSurface` that treats the rendered output as final once it stops
//! changing for a configured stability window.

mod error;
mod policy;
mod provider;
mod surface;

pub use error::{ProviderError, Result};
pub use policy::ResponsePolicy;
pub use provider::{CompletionProvider, SurfaceProvider};
pub use surface::{ChatSurface, CommandSurface};
