pub mod product;
pub mod webhook;
pub mod import_task;
