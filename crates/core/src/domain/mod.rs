pub mod event;
pub mod order;
pub mod security;
pub mod task;
pub mod user;
