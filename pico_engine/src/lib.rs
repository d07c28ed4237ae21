/*!
# PicoGine Engine

Core traits and types for the PicoGine real-time rendering engine.

This crate owns everything that does not depend on a particular graphics API:
the error taxonomy, logging, configuration, native status codes, and the
`Renderer` façade that drives one backend through a uniform frame contract.
Backends (immediate-context and explicit command-list style) live in their own
crates and are registered into a `BackendRegistry` at startup.

## Architecture

- **Backend**: capability trait every graphics backend implements
- **BackendRegistry**: maps a configured `BackendKind` to a backend factory
- **Renderer**: façade that validates the BeginFrame/EndFrame protocol
- **Engine**: long-lived context that owns the renderer and runs the frame loop
*/

// Internal modules
mod config;
mod engine;
mod error;
pub mod log;
pub mod native;
pub mod renderer;

// Main pico namespace module
pub mod pico {
    // Error types
    pub use crate::error::{PicoError, Origin, PicoResult};

    // Configuration
    pub use crate::config::{BackendKind, Config, DescriptorCapacities};

    // Engine context
    pub use crate::engine::Engine;

    // Renderer façade and backend contract
    pub use crate::renderer::{Backend, BackendFactory, BackendRegistry, Renderer};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::renderer::*;
    }

    // Native API status codes and wait primitives
    pub mod native {
        pub use crate::native::*;
    }
}

// Re-export math library at crate root
pub use glam;
