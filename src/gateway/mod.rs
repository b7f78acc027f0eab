// =============================================================================
// Gateway — live push channel from the analytics backend
// =============================================================================

pub mod connection;
pub mod message;
pub mod router;

pub use connection::run_gateway;
pub use router::MessageRouter;
