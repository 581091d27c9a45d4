// Gateway event/envelope models and backend wire models
pub mod billing;
pub mod subscription;
