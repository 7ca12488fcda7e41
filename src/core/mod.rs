// Domain-layer modules and shared errors/models
pub mod calculator {
    pub use crate::calculator::*;
}

pub mod status {
    pub use crate::status::*;
}

pub mod conversion {
    pub use crate::conversion::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod services {
    pub use crate::services::*;
}

pub mod errors {
    pub use crate::errors::*;
}
