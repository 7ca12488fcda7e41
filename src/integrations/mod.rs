//! Storage and outbound service integrations.

pub mod store {
    pub use crate::store::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}

pub mod memory_store {
    pub use crate::memory_store::*;
}

pub mod notifications {
    pub use crate::notifications::*;
}
