pub mod admins;
pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod dashboard;
pub mod payment_methods;
pub mod payments;
pub mod setup;
pub mod students;
