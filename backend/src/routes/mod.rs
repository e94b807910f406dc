pub mod batch;
pub mod health;
pub mod inference;
pub mod models;
pub mod stream;
