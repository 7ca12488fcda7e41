// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod capabilities {
    pub use crate::capabilities::*;
}
