/// Renderer module - backend contract, registry and façade

// Module declarations
pub mod backend;
pub mod renderer;
pub mod test_triangle;

#[cfg(test)]
pub(crate) mod mock_backend;

// Re-export everything from renderer.rs
pub use renderer::*;

// Re-export from other modules
pub use backend::*;
pub use test_triangle::*;
