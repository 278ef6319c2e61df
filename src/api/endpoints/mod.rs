pub mod auth;
pub mod health;
pub mod procedure_types;
pub mod procedures;
pub mod reminder;
