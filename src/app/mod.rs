pub mod backend;
pub mod errors;
pub mod factory;
pub mod local;
pub mod remote;

pub use backend::AppBackend;
pub use errors::AppError;
pub use factory::{AppFactory, AppPaths};
pub use local::AppLocal;
pub use remote::AppRemote;
