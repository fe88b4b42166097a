pub mod autodl;
pub mod models;
pub mod traits;

pub use autodl::{hash_password, AutoDlClient, AutoDlConnector, DEFAULT_BASE_URL};
pub use models::{Instance, StoppedAt};
pub use traits::{ApiConnector, ApiError, ComputeApi};
